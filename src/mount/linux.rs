//! Mounts via libfuse/fusermount on Linux.

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

const DEVICE_PATH: &str = "/dev/fuse";

const CAPABILITIES: &[MountCapability] = &[
    MountCapability::MountFlags,
    MountCapability::MountPointEmptyDir,
    MountCapability::ReadOnly,
    MountCapability::UnmountForced,
    MountCapability::VolumeName,
];

pub struct LinuxFuseMountProvider;

impl MountProvider for LinuxFuseMountProvider {
    fn display_name(&self) -> &'static str {
        "libfuse"
    }

    fn operating_system(&self) -> Os {
        Os::Linux
    }

    fn priority(&self) -> i32 {
        100
    }

    fn is_supported(&self) -> bool {
        Path::new(DEVICE_PATH).exists()
    }

    fn capabilities(&self) -> &'static [MountCapability] {
        CAPABILITIES
    }

    fn default_mount_flags(&self, volume_name: &str) -> String {
        format!("-ofsname={volume_name} -oauto_unmount")
    }

    fn for_file_system(&self, fs: Arc<dyn FilesystemOperations>) -> Box<dyn MountBuilder> {
        Box::new(LinuxFuseMountBuilder {
            fs,
            mount_point: None,
            mount_flags: Vec::new(),
            volume_name: None,
            read_only: false,
        })
    }
}

struct LinuxFuseMountBuilder {
    fs: Arc<dyn FilesystemOperations>,
    mount_point: Option<PathBuf>,
    mount_flags: Vec<String>,
    volume_name: Option<String>,
    read_only: bool,
}

impl LinuxFuseMountBuilder {
    fn combined_mount_flags(&self) -> Vec<String> {
        let mut derived = Vec::new();
        if let Some(name) = &self.volume_name {
            derived.push(format!("-ofsname={name}"));
        }
        if self.read_only {
            derived.push("-oro".to_owned());
        }
        merge_mount_flags(&self.mount_flags, &derived)
    }
}

impl MountBuilder for LinuxFuseMountBuilder {
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

    fn set_volume_name(&mut self, name: &str) -> Result<(), MountError> {
        if name.is_empty() {
            return Err(MountError::InvalidMountParameter(
                "volume name must not be empty".to_owned(),
            ));
        }
        self.volume_name = Some(name.to_owned());
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
