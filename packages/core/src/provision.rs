//! Filesystem provisioning.
//!
//! Formats and mounts the attached block device, each step only when the
//! device table shows it is needed. Re-running against a device that is
//! already in the requested shape does nothing.

use std::path::Path;

use tracing::info;

use crate::disk;
use crate::error::{Error, Result};
use crate::host::HostOps;

/// Which provisioning steps were performed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProvisionOutcome {
    pub formatted: bool,
    pub mounted: bool,
}

/// Ensures `device` carries `fstype` and is mounted at `mount_point`.
///
/// Format always precedes mount. A device that already has the requested
/// filesystem is never reformatted.
pub fn provision(
    host: &dyn HostOps,
    device: &str,
    fstype: &str,
    mount_point: &str,
) -> Result<ProvisionOutcome> {
    info!("Checking for existing filesystem on block device '{}'", device);

    let devices = host.block_devices()?;
    let alias = host.device_alias(device);
    let entry = disk::find_device(&devices, device, alias.as_deref()).ok_or_else(|| {
        Error::BlockDeviceNotFound {
            device: device.to_string(),
        }
    })?;
    let device_path = entry.device_path.as_str();

    let mut outcome = ProvisionOutcome::default();

    if entry.filesystem_type == fstype {
        info!("Volume already formatted to '{}'", fstype);
    } else {
        info!(
            "Formatting volume.. expected '{}' - current '{}'",
            fstype, entry.filesystem_type
        );
        host.format(device_path, fstype)?;
        outcome.formatted = true;
        info!("Volume formatted to '{}'", fstype);
    }

    if same_path(&entry.mount_point, mount_point) {
        info!("Volume already mounted to '{}'", mount_point);
    } else {
        info!("Mounting '{}' to '{}'", device_path, mount_point);
        host.mount(device_path, mount_point, fstype)?;
        outcome.mounted = true;
        info!("Volume mounted to '{}'", mount_point);
    }

    Ok(outcome)
}

/// Compares paths component-wise, so `/data/` and `/data` are equal.
fn same_path(current: &str, requested: &str) -> bool {
    !current.is_empty() && Path::new(current).components().eq(Path::new(requested).components())
}
