//! Lifecycle of a live mount.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::driver::FuseDriver;
use crate::error::MountError;
use crate::mount::MountCapability;
use crate::ops::FilesystemOperations;

/// Lifecycle states of a [`MountedVolume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Mounted,
    Unmounting,
    ForceUnmounting,
    Unmounted,
}

struct Inner {
    state: MountState,
    driver: Option<Box<dyn FuseDriver>>,
    released: bool,
}

/// Owning handle for a live mount.
///
/// Created in state `Mounted` by a successful builder. `release()` runs on
/// drop, so abandoning the handle tears the mount down along every exit path.
pub struct MountedVolume {
    mount_point: PathBuf,
    fs: Arc<dyn FilesystemOperations>,
    force_unmount_supported: bool,
    inner: Mutex<Inner>,
}

impl MountedVolume {
    pub fn new(
        driver: Box<dyn FuseDriver>,
        fs: Arc<dyn FilesystemOperations>,
        mount_point: PathBuf,
        force_unmount_supported: bool,
    ) -> Self {
        Self {
            mount_point,
            fs,
            force_unmount_supported,
            inner: Mutex::new(Inner {
                state: MountState::Mounted,
                driver: Some(driver),
                released: false,
            }),
        }
    }

    /// Effective mount point. Immutable after construction, so no lock is
    /// taken.
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    pub fn state(&self) -> MountState {
        self.inner.lock().state
    }

    /// Gracefully unmounts the volume.
    ///
    /// Refused while the adapter reports open files or pending operations.
    /// On backend failure the volume returns to `Mounted` so the caller can
    /// retry or escalate.
    pub fn unmount(&self) -> Result<(), MountError> {
        let mut inner = self.inner.lock();
        if inner.state == MountState::Unmounted {
            return Ok(());
        }
        if self.fs.is_in_use() {
            return Err(MountError::UnmountRefused);
        }
        inner.state = MountState::Unmounting;
        let result = match inner.driver.as_mut() {
            Some(driver) => driver.unmount(),
            None => Ok(()),
        };
        match result {
            Ok(()) => {
                inner.state = MountState::Unmounted;
                info!("Unmounted {:?}", self.mount_point);
                Ok(())
            }
            Err(e) => {
                inner.state = MountState::Mounted;
                Err(MountError::UnmountFailed(e))
            }
        }
    }

    /// Forcibly unmounts the volume, bypassing the in-use check.
    ///
    /// Only valid when the provider declared
    /// [`MountCapability::UnmountForced`].
    pub fn unmount_forced(&self) -> Result<(), MountError> {
        if !self.force_unmount_supported {
            return Err(MountError::UnsupportedCapability(
                MountCapability::UnmountForced,
            ));
        }
        let mut inner = self.inner.lock();
        if inner.state == MountState::Unmounted {
            return Ok(());
        }
        inner.state = MountState::ForceUnmounting;
        let result = match inner.driver.as_mut() {
            Some(driver) => driver.unmount_forced(),
            None => Ok(()),
        };
        match result {
            Ok(()) => {
                inner.state = MountState::Unmounted;
                info!("Force-unmounted {:?}", self.mount_point);
                Ok(())
            }
            Err(e) => {
                inner.state = MountState::Mounted;
                Err(MountError::UnmountFailed(e))
            }
        }
    }

    /// Scoped release: unmount if still mounted, escalating to a forced
    /// unmount when the graceful path fails and the capability is available,
    /// then free the native session and close the backing tree.
    ///
    /// Idempotent; the final resource release happens exactly once and
    /// regardless of unmount failures, which are returned to the caller.
    pub fn release(&self) -> Result<(), MountError> {
        let result = if self.state() == MountState::Mounted {
            self.unmount().or_else(|err| {
                if self.force_unmount_supported {
                    warn!(
                        "graceful unmount of {:?} failed ({err}), attempting forced unmount",
                        self.mount_point
                    );
                    self.unmount_forced()
                } else {
                    Err(err)
                }
            })
        } else {
            Ok(())
        };

        let mut inner = self.inner.lock();
        if !inner.released {
            inner.released = true;
            inner.driver = None;
            inner.state = MountState::Unmounted;
            self.fs.close();
        }
        result
    }
}

impl Drop for MountedVolume {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!("failed to release mount at {:?}: {err}", self.mount_point);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::testing::StubFs;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct DriverCalls {
        unmounts: AtomicUsize,
        forced: AtomicUsize,
        fail_unmount: AtomicBool,
    }

    struct RecordingDriver(Arc<DriverCalls>);

    impl FuseDriver for RecordingDriver {
        fn unmount(&mut self) -> io::Result<()> {
            self.0.unmounts.fetch_add(1, Ordering::SeqCst);
            if self.0.fail_unmount.load(Ordering::SeqCst) {
                return Err(io::Error::other("kernel says no"));
            }
            Ok(())
        }

        fn unmount_forced(&mut self) -> io::Result<()> {
            self.0.forced.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn volume_with(calls: &Arc<DriverCalls>, fs: StubFs, forced: bool) -> MountedVolume {
        MountedVolume::new(
            Box::new(RecordingDriver(calls.clone())),
            Arc::new(fs),
            PathBuf::from("/mnt/test"),
            forced,
        )
    }

    #[test]
    fn graceful_unmount_transitions_to_unmounted() {
        let calls = Arc::new(DriverCalls::default());
        let volume = volume_with(&calls, StubFs::new(), true);
        assert_eq!(volume.state(), MountState::Mounted);
        volume.unmount().unwrap();
        assert_eq!(volume.state(), MountState::Unmounted);
        assert_eq!(calls.unmounts.load(Ordering::SeqCst), 1);
        assert_eq!(calls.forced.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unmount_refused_while_in_use() {
        let calls = Arc::new(DriverCalls::default());
        let volume = volume_with(&calls, StubFs::busy(), true);
        assert!(matches!(volume.unmount(), Err(MountError::UnmountRefused)));
        assert_eq!(volume.state(), MountState::Mounted);
        assert_eq!(calls.unmounts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn release_escalates_to_forced_unmount_once() {
        let calls = Arc::new(DriverCalls::default());
        let volume = volume_with(&calls, StubFs::busy(), true);
        volume.release().unwrap();
        assert_eq!(volume.state(), MountState::Unmounted);
        assert_eq!(calls.forced.load(Ordering::SeqCst), 1);
        drop(volume);
        assert_eq!(calls.forced.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_surfaces_failure_without_forced_capability() {
        let calls = Arc::new(DriverCalls::default());
        calls.fail_unmount.store(true, Ordering::SeqCst);
        let volume = volume_with(&calls, StubFs::new(), false);
        assert!(matches!(
            volume.release(),
            Err(MountError::UnmountFailed(_))
        ));
        // resources are gone regardless
        assert_eq!(volume.state(), MountState::Unmounted);
    }

    #[test]
    fn forced_unmount_requires_capability() {
        let calls = Arc::new(DriverCalls::default());
        let volume = volume_with(&calls, StubFs::new(), false);
        assert!(matches!(
            volume.unmount_forced(),
            Err(MountError::UnsupportedCapability(
                MountCapability::UnmountForced
            ))
        ));
        volume.release().unwrap();
    }

    #[test]
    fn release_is_idempotent() {
        let calls = Arc::new(DriverCalls::default());
        let volume = volume_with(&calls, StubFs::new(), true);
        volume.release().unwrap();
        volume.release().unwrap();
        assert_eq!(calls.unmounts.load(Ordering::SeqCst), 1);
        assert_eq!(volume.state(), MountState::Unmounted);
    }

    #[test]
    fn unmount_after_release_is_a_no_op() {
        let calls = Arc::new(DriverCalls::default());
        let volume = volume_with(&calls, StubFs::new(), true);
        volume.release().unwrap();
        volume.unmount().unwrap();
        assert_eq!(calls.unmounts.load(Ordering::SeqCst), 1);
    }
}
