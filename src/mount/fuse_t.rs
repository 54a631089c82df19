//! Mounts via FUSE-T on macOS.
//!
//! See <https://www.fuse-t.org/>.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bridge::AdapterBridge;
use crate::driver::FuserDriver;
use crate::error::MountError;
use crate::mount::flags::{merge_mount_flags, parse_mount_flags};
use crate::mount::{
    validate_empty_dir, MountBuilder, MountCapability, MountProvider, MountedVolume, Os,
};
use crate::ops::FilesystemOperations;

const DYLIB_PATH: &str = "/usr/local/lib/libfuse-t.dylib";

const CAPABILITIES: &[MountCapability] = &[
    MountCapability::MountFlags,
    MountCapability::Port,
    MountCapability::UnmountForced,
    MountCapability::ReadOnly,
    MountCapability::MountPointEmptyDir,
];

pub struct FuseTMountProvider;

impl MountProvider for FuseTMountProvider {
    fn display_name(&self) -> &'static str {
        "FUSE-T"
    }

    fn operating_system(&self) -> Os {
        Os::MacOs
    }

    fn priority(&self) -> i32 {
        90
    }

    fn is_supported(&self) -> bool {
        Path::new(DYLIB_PATH).exists()
    }

    fn capabilities(&self) -> &'static [MountCapability] {
        CAPABILITIES
    }

    fn default_port(&self) -> Option<u16> {
        Some(2049)
    }

    // https://github.com/macos-fuse-t/fuse-t/wiki#supported-mount-options
    fn default_mount_flags(&self, volume_name: &str) -> String {
        format!("-ovolname={volume_name} -orwsize=262144")
    }

    fn for_file_system(&self, fs: Arc<dyn FilesystemOperations>) -> Box<dyn MountBuilder> {
        Box::new(FuseTMountBuilder {
            fs,
            mount_point: None,
            mount_flags: Vec::new(),
            read_only: false,
            port: None,
        })
    }
}

struct FuseTMountBuilder {
    fs: Arc<dyn FilesystemOperations>,
    mount_point: Option<PathBuf>,
    mount_flags: Vec<String>,
    read_only: bool,
    port: Option<u16>,
}

impl FuseTMountBuilder {
    fn combined_mount_flags(&self) -> Vec<String> {
        let mut derived = Vec::new();
        if self.read_only {
            derived.push("-r".to_owned());
        }
        if let Some(port) = self.port {
            derived.push(format!("-l{port}"));
        }
        merge_mount_flags(&self.mount_flags, &derived)
    }
}

impl MountBuilder for FuseTMountBuilder {
    fn set_mount_point(&mut self, path: &Path) -> Result<(), MountError> {
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

    fn set_port(&mut self, port: u16) -> Result<(), MountError> {
        if port == 0 {
            return Err(MountError::InvalidMountParameter(
                "port must be non-zero".to_owned(),
            ));
        }
        self.port = Some(port);
        Ok(())
    }

    fn mount(self: Box<Self>) -> Result<MountedVolume, MountError> {
        let mount_point = self.mount_point.clone().ok_or_else(|| {
            MountError::InvalidMountParameter("mount point is required".to_owned())
        })?;
        validate_empty_dir(&mount_point)?;

        let flags = self.combined_mount_flags();
        let bridge = AdapterBridge::new(self.fs.clone(), self.read_only);
        let driver =
            FuserDriver::spawn(bridge, &mount_point, &flags).map_err(MountError::MountFailed)?;
        Ok(MountedVolume::new(
            Box::new(driver),
            self.fs,
            mount_point,
            true,
        ))
    }
}
