//! Interface to the backing virtual file system.
//!
//! The adapter itself performs no storage I/O; every FUSE upcall is delegated
//! to an implementation of [`FilesystemOperations`] after the bridge has taken
//! the appropriate path and data locks. Implementations are path-based and
//! stateless from the adapter's point of view; inode mapping and locking are
//! handled by the bridge.

use std::ffi::OsString;
use std::path::Path;
use std::time::SystemTime;

use bytes::Bytes;

use crate::error::Result;

/// File type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
}

/// Metadata for a file or directory
#[derive(Debug, Clone)]
pub struct Metadata {
    pub kind: FileKind,
    pub size: u64,
    pub mtime: SystemTime,
    pub mode: Option<u32>,
}

impl Metadata {
    pub fn file(size: u64, mtime: SystemTime) -> Self {
        Self {
            kind: FileKind::File,
            size,
            mtime,
            mode: None,
        }
    }

    pub fn directory(mtime: SystemTime) -> Self {
        Self {
            kind: FileKind::Directory,
            size: 0,
            mtime,
            mode: None,
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode & 0o7777);
        self
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, FileKind::File)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, FileKind::Directory)
    }

    /// Permission bits to report, falling back to conventional defaults
    pub fn mode_or_default(&self) -> u32 {
        self.mode.unwrap_or(match self.kind {
            FileKind::File => 0o644,
            FileKind::Directory => 0o755,
        })
    }
}

/// Directory entry returned by readdir
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: OsString,
    pub kind: FileKind,
}

impl DirEntry {
    pub fn file(name: impl Into<OsString>) -> Self {
        Self {
            name: name.into(),
            kind: FileKind::File,
        }
    }

    pub fn directory(name: impl Into<OsString>) -> Self {
        Self {
            name: name.into(),
            kind: FileKind::Directory,
        }
    }
}

/// Filesystem statistics reported through statfs
#[derive(Debug, Clone, Copy)]
pub struct FsStats {
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub files: u64,
    pub files_free: u64,
    pub block_size: u32,
    pub name_len: u32,
    pub fragment_size: u32,
}

impl Default for FsStats {
    fn default() -> Self {
        Self {
            blocks: u64::MAX,
            blocks_free: u64::MAX,
            blocks_available: u64::MAX,
            files: u64::MAX,
            files_free: u64::MAX,
            block_size: 4096,
            name_len: 255,
            fragment_size: 4096,
        }
    }
}

/// Operations offered by the backing tree.
///
/// All paths are absolute within the tree (`/` is the tree root handed to the
/// mount builder). Calls run synchronously on the FUSE worker thread that
/// received the upcall; the bridge guarantees the lock regime documented on
/// each method group.
pub trait FilesystemOperations: Send + Sync {
    /// Resolve a directory entry. Called with a read lock on the path.
    ///
    /// Default implementation uses getattr()
    fn lookup(&self, path: &Path) -> Result<Metadata> {
        self.getattr(path)
    }

    /// Get metadata for a path. Called with a read lock on the path.
    fn getattr(&self, path: &Path) -> Result<Metadata>;

    /// Register an open file handle. Path and data are read-locked.
    fn open(&self, path: &Path) -> Result<()>;

    /// Drop an open file handle. Path is read-locked.
    fn release(&self, path: &Path) -> Result<()>;

    /// Read bytes from a file. Path and data are read-locked.
    fn read(&self, path: &Path, offset: u64, size: u32) -> Result<Bytes>;

    /// Write bytes to a file, returning the number of bytes written.
    /// Path is read-locked, data is write-locked.
    fn write(&self, path: &Path, offset: u64, data: &[u8]) -> Result<u64>;

    /// Truncate a file to the given size. Path is read-locked, data is
    /// write-locked.
    fn truncate(&self, path: &Path, size: u64) -> Result<()>;

    /// List directory contents. Path is read-locked.
    fn readdir(&self, path: &Path) -> Result<Vec<DirEntry>>;

    /// Create an empty file. The parent path is write-locked and the target
    /// data is write-locked.
    fn create(&self, path: &Path, mode: u32) -> Result<()>;

    /// Create a directory. The parent path is write-locked.
    fn mkdir(&self, path: &Path, mode: u32) -> Result<()>;

    /// Remove a file. The parent path is write-locked and the target data is
    /// write-locked.
    fn unlink(&self, path: &Path) -> Result<()>;

    /// Remove an empty directory. The parent path is write-locked.
    fn rmdir(&self, path: &Path) -> Result<()>;

    /// Rename a file or directory. Both paths and both data entries are
    /// write-locked, acquired in canonical order.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Flush pending writes for a file. Path is read-locked, data is
    /// write-locked.
    fn fsync(&self, path: &Path) -> Result<()>;

    /// Filesystem statistics. Path is read-locked.
    fn statfs(&self, path: &Path) -> Result<FsStats>;

    /// Whether any file handles are open or operations are pending.
    /// Consulted by the mount lifecycle before a graceful unmount.
    fn is_in_use(&self) -> bool;

    /// Release resources held by the backing tree. Called exactly once when
    /// the mount handle is released.
    fn close(&self);
}
