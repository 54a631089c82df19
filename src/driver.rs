//! Native FUSE session handling.
//!
//! The mount lifecycle talks to the native library through [`FuseDriver`], a
//! narrow seam covering teardown: graceful unmount, forced unmount and final
//! resource release (on drop). Session creation is backend-specific and lives
//! with the providers; [`FuserDriver`] is the libfuse/fuse-t implementation
//! over the `fuser` crate.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use fuser::MountOption;
use tracing::{info, warn};

use crate::bridge::AdapterBridge;

/// Teardown interface of a live native mount.
///
/// Dropping the driver releases all native resources; implementations must
/// tolerate that after a successful unmount.
pub trait FuseDriver: Send {
    /// Gracefully unmount the session.
    fn unmount(&mut self) -> io::Result<()>;

    /// Forcibly unmount the session, abandoning outstanding operations.
    fn unmount_forced(&mut self) -> io::Result<()>;
}

/// Driver over a `fuser` background session.
pub struct FuserDriver {
    session: Option<fuser::BackgroundSession>,
    mount_point: PathBuf,
}

impl FuserDriver {
    /// Registers the bridge's callback table with the kernel and mounts it.
    pub fn spawn(
        bridge: AdapterBridge,
        mount_point: &Path,
        flags: &[String],
    ) -> io::Result<Self> {
        let options = to_mount_options(flags);
        info!("Mounting at {:?}", mount_point);
        let session = fuser::spawn_mount2(bridge, mount_point, &options)?;
        Ok(Self {
            session: Some(session),
            mount_point: mount_point.to_path_buf(),
        })
    }
}

impl FuseDriver for FuserDriver {
    fn unmount(&mut self) -> io::Result<()> {
        if let Some(session) = self.session.take() {
            info!("Unmounting {:?}", self.mount_point);
            drop(session);
        }
        Ok(())
    }

    fn unmount_forced(&mut self) -> io::Result<()> {
        info!("Force-unmounting {:?}", self.mount_point);
        force_unmount_command(&self.mount_point)?;
        // The kernel connection is gone; tear the session down as well.
        if let Some(session) = self.session.take() {
            drop(session);
        }
        Ok(())
    }
}

/// Platform command for a forced unmount.
fn force_unmount_command(mount_point: &Path) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    let mut command = {
        let mut c = Command::new("fusermount3");
        c.arg("-uz").arg(mount_point);
        c
    };

    #[cfg(not(target_os = "linux"))]
    let mut command = {
        let mut c = Command::new("umount");
        c.arg("-f").arg(mount_point);
        c
    };

    let output = command.output()?;
    if !output.status.success() {
        #[cfg(target_os = "linux")]
        {
            // Older hosts only ship the fuse2 tool.
            let fallback = Command::new("fusermount")
                .arg("-uz")
                .arg(mount_point)
                .output()?;
            if fallback.status.success() {
                return Ok(());
            }
        }
        return Err(io::Error::other(format!(
            "unmount command failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Translates flag strings into `fuser` mount options.
///
/// Only `-o` options and `-r` are expressible through `fuser`; anything else
/// (for example FUSE-T's `-l<port>`, which only the fuse-t mount helper
/// understands) is skipped with a warning.
fn to_mount_options(flags: &[String]) -> Vec<MountOption> {
    let mut options = Vec::with_capacity(flags.len());
    for flag in flags {
        if flag == "-r" {
            options.push(MountOption::RO);
        } else if let Some(opt) = flag.strip_prefix("-o") {
            options.push(match opt {
                "ro" => MountOption::RO,
                "rw" => MountOption::RW,
                "auto_unmount" => MountOption::AutoUnmount,
                "allow_other" => MountOption::AllowOther,
                "allow_root" => MountOption::AllowRoot,
                "default_permissions" => MountOption::DefaultPermissions,
                _ => {
                    if let Some(name) = opt.strip_prefix("fsname=") {
                        MountOption::FSName(name.to_owned())
                    } else if let Some(subtype) = opt.strip_prefix("subtype=") {
                        MountOption::Subtype(subtype.to_owned())
                    } else {
                        MountOption::CUSTOM(opt.to_owned())
                    }
                }
            });
        } else {
            warn!("skipping mount flag not expressible through fuser: {}", flag);
        }
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_options() {
        let flags = vec![
            "-r".to_owned(),
            "-oauto_unmount".to_owned(),
            "-ofsname=vault".to_owned(),
            "-ovolname=Vault".to_owned(),
        ];
        let options = to_mount_options(&flags);
        assert!(options.contains(&MountOption::RO));
        assert!(options.contains(&MountOption::AutoUnmount));
        assert!(options.contains(&MountOption::FSName("vault".to_owned())));
        assert!(options.contains(&MountOption::CUSTOM("volname=Vault".to_owned())));
    }

    #[test]
    fn skips_non_option_flags() {
        let flags = vec!["-l2049".to_owned()];
        assert!(to_mount_options(&flags).is_empty());
    }
}
