//! fuse-vfs-adapter: mounts an abstract file system tree through native FUSE
//! backends.
//!
//! A host program hands over its tree as a [`ops::FilesystemOperations`]
//! object; the adapter turns native file-system upcalls into calls on that
//! object while enforcing correct concurrent behavior with a hierarchical
//! path-lock manager.
//!
//! # Architecture
//!
//! - **Lock manager**: per-path fair read/write locks for name-space and file
//!   content, allocated lazily and reclaimed eagerly.
//! - **Adapter bridge**: receives FUSE upcalls, takes the path/data lock
//!   combination for the operation and delegates to the backing tree.
//! - **Mount providers**: one per native backend, each declaring an operating
//!   system, a priority and a capability set; a registry selects the best
//!   match for the caller's requirements.
//! - **Mount lifecycle**: a mounted volume tracks its state, refuses
//!   unmounting while in use and escalates to a forced unmount on release
//!   when the backend supports it.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fuse_vfs_adapter::mirror::MirrorFs;
//! use fuse_vfs_adapter::mount::{select_provider, MountCapability};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = select_provider(&[MountCapability::MountFlags])?;
//! let fs = Arc::new(MirrorFs::new("/srv/data")?);
//!
//! let mut builder = provider.for_file_system(fs);
//! builder.set_mount_point("/mnt/data".as_ref())?;
//! builder.set_mount_flags(&provider.default_mount_flags("data"))?;
//! let volume = builder.mount()?;
//!
//! // ... filesystem is live ...
//!
//! volume.unmount()?;
//! volume.release()?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod driver;
pub mod error;
pub mod locks;
pub mod mirror;
pub mod mount;
pub mod ops;

pub use error::{FsError, MountError, Result};
pub use locks::LockManager;
pub use mount::{
    enumerate_providers, select_provider, MountBuilder, MountCapability, MountProvider,
    MountState, MountedVolume,
};
