//! End-to-end reconciliation run.
//!
//! Identity, volume lookup, attachment and provisioning run strictly in that
//! order. The first failure aborts the run and nothing is rolled back: a
//! volume attached before a failed mount stays attached.
//!
//! Concurrent runs against the same volume are not coordinated here; callers
//! must serialize runs per volume and instance.

use tracing::debug;

use crate::attach::{AttachOutcome, AttachmentReconciler, PollPolicy};
use crate::backoff::Clock;
use crate::error::{Error, Result};
use crate::host::HostOps;
use crate::identity::{self, InstanceIdentity};
use crate::metadata::MetadataSource;
use crate::mount;
use crate::provision::{self, ProvisionOutcome};
use crate::volume::{self, ControlPlane};

/// What the caller wants the machine to look like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileInput {
    /// Local device name to attach the volume as (e.g. `/dev/xvdf`).
    pub device_name: String,
    pub filesystem_type: String,
    pub mount_point: String,
    /// Value of the volume's `Name` tag.
    pub volume_name: String,
}

impl ReconcileInput {
    /// Checks that every parameter is present and usable.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("block-device-name", &self.device_name),
            ("filesystem-type", &self.filesystem_type),
            ("mount-point", &self.mount_point),
            ("volume-name", &self.volume_name),
        ];
        let missing: Vec<&str> = fields
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(Error::InvalidInput {
                message: format!("missing required parameters: {}", missing.join(", ")),
            });
        }

        if !mount::is_valid_fstype(&self.filesystem_type) {
            return Err(Error::InvalidInput {
                message: format!("invalid filesystem type '{}'", self.filesystem_type),
            });
        }

        Ok(())
    }
}

/// Local collaborators of a run.
pub struct Environment<'a> {
    pub metadata: &'a dyn MetadataSource,
    pub host: &'a dyn HostOps,
    pub clock: &'a dyn Clock,
    pub poll_policy: PollPolicy,
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub identity: InstanceIdentity,
    pub volume_id: String,
    pub attach: AttachOutcome,
    pub provision: ProvisionOutcome,
}

/// Runs one reconciliation.
///
/// `connect` builds the control-plane client once the region is known.
pub fn reconcile<F, P>(
    input: ReconcileInput,
    env: &Environment<'_>,
    connect: F,
) -> Result<Outcome>
where
    F: FnOnce(&InstanceIdentity) -> Result<P>,
    P: ControlPlane,
{
    let uid = env.host.effective_uid();
    if uid != 0 {
        return Err(Error::PrivilegeCheckFailed { uid });
    }

    input.validate()?;
    debug!("Reconciling {:?}", input);

    let identity = identity::resolve_identity(env.metadata)?;
    let control_plane = connect(&identity)?;

    let volume = volume::locate_volume(&control_plane, &input.volume_name, &identity.zone)?;

    let attach = AttachmentReconciler::new(&control_plane, env.clock, env.poll_policy.clone())
        .reconcile(&volume, &identity.instance_id, &input.device_name)?;

    let provision = provision::provision(
        env.host,
        &input.device_name,
        &input.filesystem_type,
        &input.mount_point,
    )?;

    Ok(Outcome {
        identity,
        volume_id: volume.id,
        attach,
        provision,
    })
}
