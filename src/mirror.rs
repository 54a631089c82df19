//! Mirrors a local directory through the adapter.
//!
//! Useful as a reference backend and as the workhorse of the integration
//! tests: it implements [`FilesystemOperations`] directly over `std::fs` and
//! tracks open handles so the mount lifecycle can refuse an unmount while
//! files are open.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use std::os::unix::fs::{DirBuilderExt, FileExt, OpenOptionsExt, PermissionsExt};
use tracing::debug;

use crate::error::{FsError, Result};
use crate::ops::{DirEntry, FileKind, FilesystemOperations, FsStats, Metadata};

pub struct MirrorFs {
    root: PathBuf,
    open_handles: AtomicUsize,
}

impl MirrorFs {
    /// Mirrors the tree rooted at `root`, which must be an existing
    /// directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(FsError::NotADirectory(root.display().to_string()));
        }
        Ok(Self {
            root,
            open_handles: AtomicUsize::new(0),
        })
    }

    /// Maps a tree path onto the mirrored directory, rejecting anything that
    /// would escape the root.
    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let mut resolved = self.root.clone();
        for component in path.components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(name) => resolved.push(name),
                _ => return Err(FsError::InvalidPath(path.display().to_string())),
            }
        }
        Ok(resolved)
    }
}

fn map_io(path: &Path, e: io::Error) -> FsError {
    match e.kind() {
        io::ErrorKind::NotFound => FsError::NotFound(path.display().to_string()),
        io::ErrorKind::AlreadyExists => FsError::AlreadyExists(path.display().to_string()),
        io::ErrorKind::PermissionDenied => FsError::PermissionDenied,
        _ => FsError::Io(e),
    }
}

fn to_metadata(meta: &fs::Metadata) -> Metadata {
    let mtime = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
    let base = if meta.is_dir() {
        Metadata::directory(mtime)
    } else {
        Metadata::file(meta.len(), mtime)
    };
    base.with_mode(meta.permissions().mode())
}

impl FilesystemOperations for MirrorFs {
    fn getattr(&self, path: &Path) -> Result<Metadata> {
        let target = self.resolve(path)?;
        let meta = fs::metadata(&target).map_err(|e| map_io(path, e))?;
        Ok(to_metadata(&meta))
    }

    fn open(&self, path: &Path) -> Result<()> {
        // Existence check doubles as the permission probe.
        self.getattr(path)?;
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self, _path: &Path) -> Result<()> {
        // unpaired releases must not wrap the counter
        let _ = self
            .open_handles
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        Ok(())
    }

    fn read(&self, path: &Path, offset: u64, size: u32) -> Result<Bytes> {
        let target = self.resolve(path)?;
        let file = File::open(&target).map_err(|e| map_io(path, e))?;
        let mut buf = vec![0u8; size as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let n = file
                .read_at(&mut buf[filled..], offset + filled as u64)
                .map_err(|e| map_io(path, e))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(Bytes::from(buf))
    }

    fn write(&self, path: &Path, offset: u64, data: &[u8]) -> Result<u64> {
        let target = self.resolve(path)?;
        let file = OpenOptions::new()
            .write(true)
            .open(&target)
            .map_err(|e| map_io(path, e))?;
        file.write_all_at(data, offset).map_err(|e| map_io(path, e))?;
        Ok(data.len() as u64)
    }

    fn truncate(&self, path: &Path, size: u64) -> Result<()> {
        let target = self.resolve(path)?;
        let file = OpenOptions::new()
            .write(true)
            .open(&target)
            .map_err(|e| map_io(path, e))?;
        file.set_len(size).map_err(|e| map_io(path, e))
    }

    fn readdir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let target = self.resolve(path)?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(&target).map_err(|e| map_io(path, e))? {
            let entry = entry.map_err(|e| map_io(path, e))?;
            let kind = if entry.file_type().map_err(|e| map_io(path, e))?.is_dir() {
                FileKind::Directory
            } else {
                FileKind::File
            };
            entries.push(DirEntry {
                name: entry.file_name(),
                kind,
            });
        }
        Ok(entries)
    }

    fn create(&self, path: &Path, mode: u32) -> Result<()> {
        let target = self.resolve(path)?;
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(&target)
            .map_err(|e| map_io(path, e))?;
        Ok(())
    }

    fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
        let target = self.resolve(path)?;
        fs::DirBuilder::new()
            .mode(mode)
            .create(&target)
            .map_err(|e| map_io(path, e))
    }

    fn unlink(&self, path: &Path) -> Result<()> {
        let target = self.resolve(path)?;
        fs::remove_file(&target).map_err(|e| map_io(path, e))
    }

    fn rmdir(&self, path: &Path) -> Result<()> {
        let target = self.resolve(path)?;
        fs::remove_dir(&target).map_err(|e| map_io(path, e))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;
        fs::rename(&source, &target).map_err(|e| map_io(from, e))
    }

    fn fsync(&self, path: &Path) -> Result<()> {
        let target = self.resolve(path)?;
        let file = File::open(&target).map_err(|e| map_io(path, e))?;
        file.sync_all().map_err(|e| map_io(path, e))
    }

    fn statfs(&self, _path: &Path) -> Result<FsStats> {
        Ok(FsStats::default())
    }

    fn is_in_use(&self) -> bool {
        self.open_handles.load(Ordering::SeqCst) > 0
    }

    fn close(&self) {
        debug!("closing mirror of {:?}", self.root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_keeps_paths_inside_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = MirrorFs::new(dir.path()).unwrap();
        let resolved = mirror.resolve(Path::new("/a/b")).unwrap();
        assert_eq!(resolved, dir.path().join("a/b"));
        assert!(matches!(
            mirror.resolve(Path::new("/../escape")),
            Err(FsError::InvalidPath(_))
        ));
    }

    #[test]
    fn root_must_be_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(
            MirrorFs::new(&file),
            Err(FsError::NotADirectory(_))
        ));
    }

    #[test]
    fn open_and_release_track_usage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f"), b"data").unwrap();
        let mirror = MirrorFs::new(dir.path()).unwrap();
        assert!(!mirror.is_in_use());
        mirror.open(Path::new("/f")).unwrap();
        assert!(mirror.is_in_use());
        mirror.release(Path::new("/f")).unwrap();
        assert!(!mirror.is_in_use());
    }
}
