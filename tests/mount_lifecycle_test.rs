//! Mount lifecycle behavior with a mock native driver.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use fuse_vfs_adapter::driver::FuseDriver;
use fuse_vfs_adapter::mirror::MirrorFs;
use fuse_vfs_adapter::mount::{enumerate_providers, select_provider, MountState, MountedVolume};
use fuse_vfs_adapter::ops::FilesystemOperations;
use fuse_vfs_adapter::MountError;

#[derive(Default)]
struct DriverCalls {
    unmounts: AtomicUsize,
    forced: AtomicUsize,
}

struct CountingDriver(Arc<DriverCalls>);

impl FuseDriver for CountingDriver {
    fn unmount(&mut self) -> io::Result<()> {
        self.0.unmounts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unmount_forced(&mut self) -> io::Result<()> {
        self.0.forced.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn mirror_with_file() -> Result<(tempfile::TempDir, Arc<MirrorFs>)> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("open-me"), b"data")?;
    let fs = Arc::new(MirrorFs::new(dir.path())?);
    Ok((dir, fs))
}

#[test]
fn forced_unmount_is_invoked_once_when_released_in_use() -> Result<()> {
    let (_dir, fs) = mirror_with_file()?;
    // an open handle marks the adapter as in use
    fs.open(Path::new("/open-me"))?;

    let calls = Arc::new(DriverCalls::default());
    let volume = MountedVolume::new(
        Box::new(CountingDriver(calls.clone())),
        fs,
        PathBuf::from("/mnt/vault"),
        true,
    );

    volume.release()?;
    assert_eq!(volume.state(), MountState::Unmounted);
    assert_eq!(calls.unmounts.load(Ordering::SeqCst), 0);
    assert_eq!(calls.forced.load(Ordering::SeqCst), 1);

    // dropping must not unmount a second time
    drop(volume);
    assert_eq!(calls.forced.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn unmount_is_refused_until_handles_close() -> Result<()> {
    let (_dir, fs) = mirror_with_file()?;
    fs.open(Path::new("/open-me"))?;

    let calls = Arc::new(DriverCalls::default());
    let volume = MountedVolume::new(
        Box::new(CountingDriver(calls.clone())),
        fs.clone(),
        PathBuf::from("/mnt/vault"),
        true,
    );

    assert!(matches!(volume.unmount(), Err(MountError::UnmountRefused)));
    assert_eq!(volume.state(), MountState::Mounted);

    fs.release(Path::new("/open-me"))?;
    volume.unmount()?;
    assert_eq!(volume.state(), MountState::Unmounted);
    assert_eq!(calls.unmounts.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn mount_point_is_readable_without_locking() -> Result<()> {
    let (_dir, fs) = mirror_with_file()?;
    let volume = MountedVolume::new(
        Box::new(CountingDriver(Arc::new(DriverCalls::default()))),
        fs,
        PathBuf::from("/mnt/vault"),
        true,
    );
    assert_eq!(volume.mount_point(), Path::new("/mnt/vault"));
    volume.release()?;
    // still answers after release
    assert_eq!(volume.mount_point(), Path::new("/mnt/vault"));
    Ok(())
}

#[test]
fn provider_selection_is_deterministic_on_this_host() {
    let first = select_provider(&[]);
    for _ in 0..5 {
        let again = select_provider(&[]);
        match (&first, &again) {
            (Ok(a), Ok(b)) => assert_eq!(a.display_name(), b.display_name()),
            (Err(MountError::NoApplicableProvider), Err(MountError::NoApplicableProvider)) => {}
            _ => panic!("selection changed between calls"),
        }
    }
}

#[test]
fn all_registered_providers_have_distinct_names() {
    let mut names: Vec<_> = enumerate_providers()
        .iter()
        .map(|p| p.display_name())
        .collect();
    names.sort_unstable();
    let len = names.len();
    names.dedup();
    assert_eq!(len, names.len());
    assert!(len >= 3);
}
