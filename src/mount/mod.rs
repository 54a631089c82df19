//! Mount providers, capability negotiation and the mount lifecycle.
//!
//! A [`MountProvider`] is a factory for mounts against one native backend.
//! Providers are registered process-wide; [`select_provider`] picks the best
//! one for the current host and a required capability set, its builder
//! validates parameters and materializes backend flags, and a successful
//! `mount()` yields a [`MountedVolume`] owning the live session.

mod flags;
mod fuse_t;
mod linux;
mod volume;
mod winfsp;

pub use fuse_t::FuseTMountProvider;
pub use linux::LinuxFuseMountProvider;
pub use volume::{MountState, MountedVolume};
pub use winfsp::WinFspNetworkMountProvider;

use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::error::MountError;
use crate::ops::FilesystemOperations;

/// Features a provider can offer. Closed set; callers request a subset and
/// builders reject setters outside the selected provider's set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MountCapability {
    MountFlags,
    MountAsDriveLetter,
    MountWithinExistingParent,
    MountToSystemChosenPath,
    MountPointEmptyDir,
    ReadOnly,
    UnmountForced,
    VolumeName,
    LoopbackHostName,
    Port,
}

/// Operating systems providers can declare applicability for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Linux,
    MacOs,
    Windows,
}

impl Os {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Os::MacOs
        } else if cfg!(windows) {
            Os::Windows
        } else {
            Os::Linux
        }
    }
}

/// Factory for mounts against one native backend.
///
/// Descriptors are immutable and live for the process lifetime.
pub trait MountProvider: Send + Sync {
    fn display_name(&self) -> &'static str;

    fn operating_system(&self) -> Os;

    /// Higher wins during selection.
    fn priority(&self) -> i32;

    /// Runtime probe for the native backend, e.g. its library on disk.
    fn is_supported(&self) -> bool;

    fn capabilities(&self) -> &'static [MountCapability];

    fn supports(&self, capability: MountCapability) -> bool {
        self.capabilities().contains(&capability)
    }

    fn default_port(&self) -> Option<u16> {
        None
    }

    /// Backend flags a caller would normally pass to `set_mount_flags`.
    fn default_mount_flags(&self, volume_name: &str) -> String;

    /// Builder for mounting the given backing tree.
    fn for_file_system(&self, fs: Arc<dyn FilesystemOperations>) -> Box<dyn MountBuilder>;
}

/// Per-provider mount builder.
///
/// Setters for capabilities the provider lacks answer
/// [`MountError::UnsupportedCapability`]; that is the default for everything
/// but the mount point.
pub trait MountBuilder {
    fn set_mount_point(&mut self, path: &Path) -> Result<(), MountError>;

    fn set_mount_flags(&mut self, flags: &str) -> Result<(), MountError> {
        let _ = flags;
        Err(MountError::UnsupportedCapability(MountCapability::MountFlags))
    }

    fn set_read_only(&mut self, read_only: bool) -> Result<(), MountError> {
        let _ = read_only;
        Err(MountError::UnsupportedCapability(MountCapability::ReadOnly))
    }

    fn set_volume_name(&mut self, name: &str) -> Result<(), MountError> {
        let _ = name;
        Err(MountError::UnsupportedCapability(MountCapability::VolumeName))
    }

    fn set_port(&mut self, port: u16) -> Result<(), MountError> {
        let _ = port;
        Err(MountError::UnsupportedCapability(MountCapability::Port))
    }

    fn set_loopback_host_name(&mut self, host_name: &str) -> Result<(), MountError> {
        let _ = host_name;
        Err(MountError::UnsupportedCapability(
            MountCapability::LoopbackHostName,
        ))
    }

    /// Validates parameters, materializes backend flags and mounts.
    fn mount(self: Box<Self>) -> Result<MountedVolume, MountError>;
}

static PROVIDERS: Lazy<Vec<Box<dyn MountProvider>>> = Lazy::new(|| {
    vec![
        Box::new(LinuxFuseMountProvider),
        Box::new(FuseTMountProvider),
        Box::new(WinFspNetworkMountProvider),
    ]
});

/// All registered providers, regardless of host applicability.
pub fn enumerate_providers() -> &'static [Box<dyn MountProvider>] {
    &PROVIDERS
}

/// Picks the highest-priority provider applicable to the current host that
/// supports every required capability.
pub fn select_provider(
    required: &[MountCapability],
) -> Result<&'static dyn MountProvider, MountError> {
    select_from(&PROVIDERS, Os::current(), required)
}

fn select_from<'a>(
    providers: &'a [Box<dyn MountProvider>],
    os: Os,
    required: &[MountCapability],
) -> Result<&'a dyn MountProvider, MountError> {
    providers
        .iter()
        .filter(|p| p.operating_system() == os)
        .filter(|p| p.is_supported())
        .filter(|p| required.iter().all(|c| p.supports(*c)))
        // Highest priority wins; ties go to the lexicographically smallest
        // display name so selection is deterministic.
        .max_by(|a, b| {
            a.priority()
                .cmp(&b.priority())
                .then_with(|| b.display_name().cmp(a.display_name()))
        })
        .map(|p| p.as_ref())
        .ok_or(MountError::NoApplicableProvider)
}

/// Validates that a mount point exists, is a directory and is empty.
fn validate_empty_dir(path: &Path) -> Result<(), MountError> {
    if !path.is_dir() {
        return Err(MountError::InvalidMountParameter(format!(
            "mount point is not a directory: {}",
            path.display()
        )));
    }
    let mut entries = std::fs::read_dir(path)
        .map_err(|e| MountError::InvalidMountParameter(format!("unreadable mount point: {e}")))?;
    if entries.next().is_some() {
        return Err(MountError::InvalidMountParameter(format!(
            "mount point is not empty: {}",
            path.display()
        )));
    }
    Ok(())
}
