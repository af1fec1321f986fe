//! Block device table scanning using lsblk.
//!
//! This module reads the OS's view of block devices: which device nodes
//! exist, which filesystem each one carries and where it is mounted.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::executor;

/// A point-in-time snapshot of one entry in the OS's block device table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDeviceInfo {
    /// Full device path (e.g., "/dev/nvme1n1").
    pub device_path: String,
    /// Filesystem type, empty if unformatted.
    pub filesystem_type: String,
    /// Current mount point, empty if unmounted.
    pub mount_point: String,
}

impl LocalDeviceInfo {
    /// Returns true if this device carries a filesystem.
    pub fn is_formatted(&self) -> bool {
        !self.filesystem_type.is_empty()
    }

    /// Returns true if this device is currently mounted.
    pub fn is_mounted(&self) -> bool {
        !self.mount_point.is_empty()
    }
}

/// Raw JSON structure from lsblk output.
#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(default)]
    fstype: Option<String>,
    #[serde(default)]
    mountpoint: Option<String>,
    #[serde(default)]
    children: Option<Vec<LsblkDevice>>,
}

/// Lists all block devices on the system, disks and partitions alike.
///
/// Calls `lsblk --json --paths` and parses the output.
pub fn list_block_devices() -> Result<Vec<LocalDeviceInfo>> {
    let output = executor::run_checked(
        "lsblk",
        &[
            "--json",
            "--paths",
            "--output",
            "NAME,FSTYPE,MOUNTPOINT,TYPE",
        ],
    )?;

    parse_lsblk(&String::from_utf8_lossy(&output.stdout))
}

fn parse_lsblk(json: &str) -> Result<Vec<LocalDeviceInfo>> {
    let lsblk_output: LsblkOutput = serde_json::from_str(json).map_err(|e| Error::LsblkParse {
        message: e.to_string(),
    })?;

    let mut devices = Vec::new();
    collect_devices(&lsblk_output.blockdevices, &mut devices);
    Ok(devices)
}

/// Recursively collect devices from lsblk output, including children (partitions).
fn collect_devices(lsblk_devices: &[LsblkDevice], devices: &mut Vec<LocalDeviceInfo>) {
    for dev in lsblk_devices {
        // Without --paths lsblk reports bare names
        let device_path = if dev.name.starts_with('/') {
            dev.name.clone()
        } else {
            format!("/dev/{}", dev.name)
        };

        devices.push(LocalDeviceInfo {
            device_path,
            filesystem_type: dev.fstype.clone().unwrap_or_default(),
            mount_point: dev.mountpoint.clone().unwrap_or_default(),
        });

        if let Some(children) = &dev.children {
            collect_devices(children, devices);
        }
    }
}

/// Resolves `device` through symlinks (e.g. `/dev/xvdf -> /dev/nvme1n1`).
///
/// Returns `None` when the path does not exist or is not a link.
pub fn resolve_device_link(device: &str) -> Option<String> {
    let resolved = Path::new(device).canonicalize().ok()?;
    let resolved = resolved.to_str()?;
    (resolved != device).then(|| resolved.to_string())
}

/// Finds the entry for `device` in `devices`, also trying `alias`.
pub fn find_device<'a>(
    devices: &'a [LocalDeviceInfo],
    device: &str,
    alias: Option<&str>,
) -> Option<&'a LocalDeviceInfo> {
    devices
        .iter()
        .find(|d| d.device_path == device)
        .or_else(|| alias.and_then(|alias| devices.iter().find(|d| d.device_path == alias)))
}
