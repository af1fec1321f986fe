//! Attachment reconciliation.
//!
//! The control plane owns the attachment record. This module classifies what
//! it reports, issues an attach request when the volume is free, and then
//! polls until the control plane confirms the attachment.

use std::time::Duration;

use snafu::ResultExt;
use tracing::{debug, info};

use crate::backoff::{Backoff, Clock, DEFAULT_FACTOR, DEFAULT_MAX_DELAY, DEFAULT_MIN_DELAY};
use crate::error::{AttachRequestRejectedSnafu, ControlPlaneSnafu, Error, Result};
use crate::volume::{ControlPlane, Volume};

/// Where a volume stands relative to the calling instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentStatus {
    /// No attachment record.
    Unattached,
    /// Attached (or attaching) to the calling instance.
    AttachedToSelf,
    /// Attached to a different instance.
    AttachedToOther { instance_id: String },
    /// More than one attachment record.
    Ambiguous { count: usize },
}

/// Classifies `volume` from the point of view of `instance_id`.
pub fn classify(volume: &Volume, instance_id: &str) -> AttachmentStatus {
    match volume.attachments.as_slice() {
        [] => AttachmentStatus::Unattached,
        [attachment] if attachment.instance_id == instance_id => AttachmentStatus::AttachedToSelf,
        [attachment] => AttachmentStatus::AttachedToOther {
            instance_id: attachment.instance_id.clone(),
        },
        attachments => AttachmentStatus::Ambiguous {
            count: attachments.len(),
        },
    }
}

/// How the confirmation poll paces itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub factor: u32,
    /// Give up after this long. `None` polls until the attachment settles.
    pub deadline: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            min_delay: DEFAULT_MIN_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            factor: DEFAULT_FACTOR,
            deadline: None,
        }
    }
}

impl PollPolicy {
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    fn backoff(&self) -> Backoff {
        Backoff::new(self.min_delay, self.max_delay, self.factor)
    }
}

/// What the reconciler had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    AlreadyAttached,
    /// An attach request was issued and confirmed after `polls` re-fetches.
    Attached { polls: usize },
}

/// Drives a volume to the attached state on the calling instance.
pub struct AttachmentReconciler<'a> {
    control_plane: &'a dyn ControlPlane,
    clock: &'a dyn Clock,
    policy: PollPolicy,
}

impl<'a> AttachmentReconciler<'a> {
    pub fn new(
        control_plane: &'a dyn ControlPlane,
        clock: &'a dyn Clock,
        policy: PollPolicy,
    ) -> Self {
        Self {
            control_plane,
            clock,
            policy,
        }
    }

    /// Ensures `volume` ends up attached to `instance_id` as `device`.
    ///
    /// Never touches a volume attached to another instance.
    pub fn reconcile(
        &self,
        volume: &Volume,
        instance_id: &str,
        device: &str,
    ) -> Result<AttachOutcome> {
        debug!("Checking if volume '{}' is attached", volume.id);

        match classify(volume, instance_id) {
            AttachmentStatus::AttachedToSelf => {
                info!("Volume is already attached to the instance");
                Ok(AttachOutcome::AlreadyAttached)
            }
            AttachmentStatus::AttachedToOther { instance_id } => {
                Err(Error::VolumeAttachedElsewhere {
                    volume_id: volume.id.clone(),
                    instance_id,
                })
            }
            AttachmentStatus::Ambiguous { count } => {
                Err(Error::UnexpectedAttachmentCardinality {
                    volume_id: volume.id.clone(),
                    count,
                })
            }
            AttachmentStatus::Unattached => {
                info!("Volume is available, attaching it to the instance");
                self.control_plane
                    .attach_volume(&volume.id, instance_id, device)
                    .context(AttachRequestRejectedSnafu {
                        volume_id: volume.id.clone(),
                    })?;

                let polls = self.wait_until_attached(&volume.id, instance_id)?;
                info!("Volume attached!");
                Ok(AttachOutcome::Attached { polls })
            }
        }
    }

    /// Re-fetches the volume until its attachment reports `attached`.
    ///
    /// Returns the number of re-fetches. API errors are not retried.
    fn wait_until_attached(&self, volume_id: &str, instance_id: &str) -> Result<usize> {
        let started = self.clock.now();
        let mut backoff = self.policy.backoff();
        let mut polls = 0;

        loop {
            let volume = self
                .control_plane
                .describe_volume(volume_id)
                .context(ControlPlaneSnafu {
                    operation: "DescribeVolumes",
                })?;
            polls += 1;

            let state = match volume {
                None => None,
                Some(volume) => match classify(&volume, instance_id) {
                    AttachmentStatus::Unattached => None,
                    AttachmentStatus::AttachedToSelf => {
                        volume.attachments.into_iter().next().map(|a| a.state)
                    }
                    AttachmentStatus::AttachedToOther { instance_id } => {
                        return Err(Error::VolumeAttachedElsewhere {
                            volume_id: volume_id.to_string(),
                            instance_id,
                        });
                    }
                    AttachmentStatus::Ambiguous { count } => {
                        return Err(Error::UnexpectedAttachmentCardinality {
                            volume_id: volume_id.to_string(),
                            count,
                        });
                    }
                },
            };

            if state.as_ref().is_some_and(|state| state.is_terminal()) {
                return Ok(polls);
            }

            let mut delay = backoff.next_delay();
            if let Some(deadline) = self.policy.deadline {
                let elapsed = self.clock.now().saturating_duration_since(started);
                let remaining = deadline.saturating_sub(elapsed);
                if remaining.is_zero() {
                    return Err(Error::AttachTimeout {
                        volume_id: volume_id.to_string(),
                        elapsed,
                    });
                }
                delay = delay.min(remaining);
            }

            debug!(
                "Waiting for attachment to complete. '{}'",
                state.as_ref().map_or("none", |state| state.as_str())
            );
            self.clock.sleep(delay);
        }
    }
}
