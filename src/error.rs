use std::io;
use thiserror::Error;

use crate::mount::MountCapability;

/// Error type for operations on the backing virtual file system
#[derive(Error, Debug)]
pub enum FsError {
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Path already exists: {0}")]
    AlreadyExists(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Read-only filesystem")]
    ReadOnly,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    /// Convert error to libc errno for FUSE responses
    pub fn to_errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::AlreadyExists(_) => libc::EEXIST,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::IsADirectory(_) => libc::EISDIR,
            FsError::NotEmpty(_) => libc::ENOTEMPTY,
            FsError::InvalidPath(_) => libc::EINVAL,
            FsError::NotSupported(_) => libc::ENOSYS,
            FsError::ReadOnly => libc::EROFS,
            FsError::PermissionDenied => libc::EACCES,
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

/// Result type alias for filesystem operations
pub type Result<T> = std::result::Result<T, FsError>;

/// Errors surfaced by provider selection, mounting and unmounting
#[derive(Error, Debug)]
pub enum MountError {
    #[error("no mount provider is applicable to this host")]
    NoApplicableProvider,

    #[error("the selected provider does not support {0:?}")]
    UnsupportedCapability(MountCapability),

    #[error("invalid mount parameter: {0}")]
    InvalidMountParameter(String),

    #[error("mount failed")]
    MountFailed(#[source] io::Error),

    #[error("unmount refused: there are open files or pending operations")]
    UnmountRefused,

    #[error("unmount failed")]
    UnmountFailed(#[source] io::Error),
}
