//! Network mounts via WinFsp on Windows.
//!
//! The provider carries the full capability negotiation, validation and flag
//! materialization for WinFsp network mounts; no native WinFsp driver is
//! linked into this build, so `mount()` reports failure. On other hosts the
//! operating-system filter keeps this provider out of selection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::error::MountError;
use crate::mount::flags::{merge_mount_flags, parse_mount_flags};
use crate::mount::{MountBuilder, MountCapability, MountProvider, MountedVolume, Os};
use crate::ops::FilesystemOperations;

const DLL_PATH: &str = "C:\\Program Files (x86)\\WinFsp\\bin\\winfsp-x64.dll";

// unreserved characters according to https://www.rfc-editor.org/rfc/rfc3986#section-2.3
static HOST_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[a-zA-Z0-9\\-._~]+$").expect("valid pattern"));

const CAPABILITIES: &[MountCapability] = &[
    MountCapability::MountFlags,
    MountCapability::MountAsDriveLetter,
    MountCapability::UnmountForced,
    MountCapability::ReadOnly,
    MountCapability::VolumeName,
    MountCapability::LoopbackHostName,
];

pub struct WinFspNetworkMountProvider;

impl MountProvider for WinFspNetworkMountProvider {
    fn display_name(&self) -> &'static str {
        "WinFsp"
    }

    fn operating_system(&self) -> Os {
        Os::Windows
    }

    fn priority(&self) -> i32 {
        100
    }

    fn is_supported(&self) -> bool {
        Path::new(DLL_PATH).exists()
    }

    fn capabilities(&self) -> &'static [MountCapability] {
        CAPABILITIES
    }

    fn default_mount_flags(&self, _volume_name: &str) -> String {
        "-ouid=-1 -ogid=-1".to_owned()
    }

    fn for_file_system(&self, fs: Arc<dyn FilesystemOperations>) -> Box<dyn MountBuilder> {
        Box::new(WinFspNetworkMountBuilder {
            fs,
            mount_point: None,
            mount_flags: Vec::new(),
            read_only: false,
            volume_name: None,
            loopback_host_name: "localhost".to_owned(),
        })
    }
}

/// A drive-letter root such as `X:` or `X:\`.
fn is_drive_letter_root(path: &Path) -> bool {
    let Some(s) = path.to_str() else {
        return false;
    };
    let bytes = s.as_bytes();
    matches!(bytes, [letter, b':'] | [letter, b':', b'\\'] | [letter, b':', b'/']
        if letter.is_ascii_alphabetic())
}

struct WinFspNetworkMountBuilder {
    /// Consumed once a native WinFsp driver is linked in.
    #[allow(dead_code)]
    fs: Arc<dyn FilesystemOperations>,
    mount_point: Option<PathBuf>,
    mount_flags: Vec<String>,
    read_only: bool,
    volume_name: Option<String>,
    loopback_host_name: String,
}

impl WinFspNetworkMountBuilder {
    fn combined_mount_flags(&self) -> Vec<String> {
        let mut derived = Vec::new();
        if self.read_only {
            derived.push("-oro".to_owned());
        }
        let volume = match &self.volume_name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => Uuid::new_v4().to_string(),
        };
        derived.push(format!(
            "-oVolumePrefix=/{}/{}",
            self.loopback_host_name, volume
        ));
        merge_mount_flags(&self.mount_flags, &derived)
    }
}

impl MountBuilder for WinFspNetworkMountBuilder {
    fn set_mount_point(&mut self, path: &Path) -> Result<(), MountError> {
        if !is_drive_letter_root(path) {
            return Err(MountError::InvalidMountParameter(
                "mount point must be a drive letter".to_owned(),
            ));
        }
        self.mount_point = Some(path.to_path_buf());
        Ok(())
    }

    fn set_mount_flags(&mut self, flags: &str) -> Result<(), MountError> {
        self.mount_flags = parse_mount_flags(flags)?;
        Ok(())
    }

    fn set_read_only(&mut self, read_only: bool) -> Result<(), MountError> {
        self.read_only = read_only;
        Ok(())
    }

    fn set_volume_name(&mut self, name: &str) -> Result<(), MountError> {
        self.volume_name = Some(name.to_owned());
        Ok(())
    }

    fn set_loopback_host_name(&mut self, host_name: &str) -> Result<(), MountError> {
        if !HOST_NAME_PATTERN.is_match(host_name) {
            return Err(MountError::InvalidMountParameter(
                "loopback host may only contain the characters a-z, A-Z, 0-9 and -._~".to_owned(),
            ));
        }
        self.loopback_host_name = host_name.to_owned();
        Ok(())
    }

    fn mount(self: Box<Self>) -> Result<MountedVolume, MountError> {
        self.mount_point.as_ref().ok_or_else(|| {
            MountError::InvalidMountParameter("mount point is required".to_owned())
        })?;
        let _flags = self.combined_mount_flags();
        Err(MountError::MountFailed(std::io::Error::other(
            "the WinFsp driver is not linked into this build",
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::testing::StubFs;

    fn builder() -> WinFspNetworkMountBuilder {
        WinFspNetworkMountBuilder {
            fs: Arc::new(StubFs::new()),
            mount_point: None,
            mount_flags: Vec::new(),
            read_only: false,
            volume_name: None,
            loopback_host_name: "localhost".to_owned(),
        }
    }

    #[test]
    fn declares_windows_capabilities() {
        let provider = WinFspNetworkMountProvider;
        assert_eq!(provider.operating_system(), Os::Windows);
        assert!(provider.supports(MountCapability::MountAsDriveLetter));
        assert!(provider.supports(MountCapability::LoopbackHostName));
        // no MOUNT_WITHIN_EXISTING_PARENT support here
        assert!(!provider.supports(MountCapability::MountWithinExistingParent));
    }

    #[test]
    fn mount_point_must_be_a_drive_letter() {
        let mut b = builder();
        assert!(b.set_mount_point(Path::new("X:")).is_ok());
        assert!(b.set_mount_point(Path::new("X:\\")).is_ok());
        assert!(matches!(
            b.set_mount_point(Path::new("C:\\mnt\\vault")),
            Err(MountError::InvalidMountParameter(_))
        ));
    }

    #[test]
    fn host_name_restricted_to_unreserved_characters() {
        let mut b = builder();
        assert!(b.set_loopback_host_name("my-host_1.example~").is_ok());
        assert!(matches!(
            b.set_loopback_host_name("bad host"),
            Err(MountError::InvalidMountParameter(_))
        ));
        assert!(matches!(
            b.set_loopback_host_name("bad/host"),
            Err(MountError::InvalidMountParameter(_))
        ));
    }

    #[test]
    fn volume_prefix_uses_host_and_volume_name() {
        let mut b = builder();
        b.set_loopback_host_name("cryptofs").unwrap();
        b.set_volume_name("vault").unwrap();
        let flags = b.combined_mount_flags();
        assert!(flags.contains(&"-oVolumePrefix=/cryptofs/vault".to_owned()));
    }

    #[test]
    fn blank_volume_name_falls_back_to_uuid() {
        let mut b = builder();
        b.set_volume_name("  ").unwrap();
        let flags = b.combined_mount_flags();
        let prefix = flags
            .iter()
            .find(|f| f.starts_with("-oVolumePrefix=/localhost/"))
            .expect("volume prefix flag present");
        let tail = prefix.rsplit('/').next().unwrap();
        assert!(Uuid::parse_str(tail).is_ok());
    }

    #[test]
    fn mount_requires_mount_point() {
        let b: Box<dyn MountBuilder> = Box::new(builder());
        assert!(matches!(
            b.mount(),
            Err(MountError::InvalidMountParameter(_))
        ));
    }
}
