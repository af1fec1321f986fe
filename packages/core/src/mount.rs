//! Format and mount operations module.
//!
//! This module creates filesystems with the `mkfs.<type>` utilities and
//! mounts devices through `mount(2)`.

use std::fs;
use std::path::Path;

use nix::mount::MsFlags;
use tracing::info;

use crate::error::{Error, IoResultExt, Result};
use crate::executor;

/// Directory holding the `mkfs.<type>` utilities.
pub const MKFS_DIR: &str = "/usr/sbin";

/// Flags used for every mount: read-write, set-user-id bits ignored.
pub const MOUNT_FLAGS: MsFlags = MsFlags::MS_NOSUID;

/// Returns true if `fstype` can safely name a `mkfs.<type>` utility.
pub fn is_valid_fstype(fstype: &str) -> bool {
    !fstype.is_empty() && fstype.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Creates a filesystem of type `fstype` on `device`.
///
/// Runs `<MKFS_DIR>/mkfs.<fstype> <device>`. The tool's output is logged and
/// its stderr is carried in the error on failure.
pub fn format_device(device: &str, fstype: &str) -> Result<()> {
    if !is_valid_fstype(fstype) {
        return Err(Error::InvalidInput {
            message: format!("invalid filesystem type '{}'", fstype),
        });
    }

    let tool = format!("{}/mkfs.{}", MKFS_DIR, fstype);
    let output = executor::run(&tool, &[device])?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    for line in stdout.lines().chain(stderr.lines()) {
        info!("{}: {}", tool, line);
    }

    if !output.status.success() {
        return Err(Error::FormatFailed {
            device: device.to_string(),
            fstype: fstype.to_string(),
            code: output.status.code().unwrap_or(-1),
            output: stderr.trim().to_string(),
        });
    }

    Ok(())
}

/// Creates a mount point directory if it doesn't exist.
pub fn create_mount_point(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path).mount_point_context(path)?;
    }
    Ok(())
}

/// Mounts `device` on `mount_point` as `fstype`.
pub fn mount_device(device: &str, mount_point: &str, fstype: &str) -> Result<()> {
    // Ensure mount point exists
    create_mount_point(Path::new(mount_point))?;

    nix::mount::mount(
        Some(device),
        mount_point,
        Some(fstype),
        MOUNT_FLAGS,
        None::<&str>,
    )
    .map_err(|e| Error::MountFailed {
        device: device.to_string(),
        mount_point: mount_point.to_string(),
        message: e.to_string(),
    })
}
