//! Host OS capabilities.
//!
//! Everything the reconciler does to the local machine goes through
//! [`HostOps`], so the reconciliation logic runs against a fake in tests.

use crate::disk::{self, LocalDeviceInfo};
use crate::error::Result;
use crate::mount;

/// Privileged local operations.
pub trait HostOps {
    /// Effective user id of the running process.
    fn effective_uid(&self) -> u32;

    /// Current snapshot of the block device table.
    fn block_devices(&self) -> Result<Vec<LocalDeviceInfo>>;

    /// Alternate name for `device` in the device table, if any.
    fn device_alias(&self, _device: &str) -> Option<String> {
        None
    }

    /// Creates a filesystem of type `fstype` on `device`.
    fn format(&self, device: &str, fstype: &str) -> Result<()>;

    /// Mounts `device` on `mount_point` as `fstype`.
    fn mount(&self, device: &str, mount_point: &str, fstype: &str) -> Result<()>;
}

/// The real machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHost;

impl HostOps for SystemHost {
    fn effective_uid(&self) -> u32 {
        nix::unistd::geteuid().as_raw()
    }

    fn block_devices(&self) -> Result<Vec<LocalDeviceInfo>> {
        disk::list_block_devices()
    }

    fn device_alias(&self, device: &str) -> Option<String> {
        disk::resolve_device_link(device)
    }

    fn format(&self, device: &str, fstype: &str) -> Result<()> {
        mount::format_device(device, fstype)
    }

    fn mount(&self, device: &str, mount_point: &str, fstype: &str) -> Result<()> {
        mount::mount_device(device, mount_point, fstype)
    }
}
