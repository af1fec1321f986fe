//! Volume model and name-based lookup.
//!
//! Volumes and their attachments are owned by the control plane. This module
//! only describes what a lookup returns and how a single volume is picked out
//! of a name/zone query.

use snafu::ResultExt;
use tracing::{debug, info};

use crate::error::{ControlPlaneSnafu, Error, ProviderError, Result};

/// Attachment progress as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentState {
    Attaching,
    Attached,
    Detaching,
    Detached,
    /// A state value this tool does not know about.
    Other(String),
}

impl AttachmentState {
    /// Parses the provider's state string.
    pub fn parse(value: &str) -> Self {
        match value {
            "attaching" => Self::Attaching,
            "attached" => Self::Attached,
            "detaching" => Self::Detaching,
            "detached" => Self::Detached,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns true for the state in which the volume is usable.
    pub fn is_terminal(&self) -> bool {
        *self == Self::Attached
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Attaching => "attaching",
            Self::Attached => "attached",
            Self::Detaching => "detaching",
            Self::Detached => "detached",
            Self::Other(value) => value,
        }
    }
}

/// Binding of a volume to an instance under a device name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub instance_id: String,
    pub device: String,
    pub state: AttachmentState,
}

/// A network block volume as seen by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub id: String,
    /// Value of the volume's `Name` tag, when present.
    pub name: Option<String>,
    pub zone: String,
    pub attachments: Vec<Attachment>,
}

/// Control-plane operations the reconciler depends on.
///
/// Implementations return provider errors untouched; callers attach the
/// operation context.
pub trait ControlPlane {
    /// Lists volumes whose `Name` tag equals `name` within `zone`.
    fn find_volumes(
        &self,
        name: &str,
        zone: &str,
    ) -> std::result::Result<Vec<Volume>, ProviderError>;

    /// Requests that `volume_id` be attached to `instance_id` as `device`.
    fn attach_volume(
        &self,
        volume_id: &str,
        instance_id: &str,
        device: &str,
    ) -> std::result::Result<(), ProviderError>;

    /// Fetches a single volume by id. `None` when the lookup came back empty.
    fn describe_volume(
        &self,
        volume_id: &str,
    ) -> std::result::Result<Option<Volume>, ProviderError>;
}

impl<T: ControlPlane + ?Sized> ControlPlane for &T {
    fn find_volumes(
        &self,
        name: &str,
        zone: &str,
    ) -> std::result::Result<Vec<Volume>, ProviderError> {
        (**self).find_volumes(name, zone)
    }

    fn attach_volume(
        &self,
        volume_id: &str,
        instance_id: &str,
        device: &str,
    ) -> std::result::Result<(), ProviderError> {
        (**self).attach_volume(volume_id, instance_id, device)
    }

    fn describe_volume(
        &self,
        volume_id: &str,
    ) -> std::result::Result<Option<Volume>, ProviderError> {
        (**self).describe_volume(volume_id)
    }
}

/// Finds the single volume tagged `name` in `zone`.
///
/// Zero or several matches are an error carrying the observed count.
pub fn locate_volume(control_plane: &dyn ControlPlane, name: &str, zone: &str) -> Result<Volume> {
    debug!("Looking up volume '{}' in '{}'", name, zone);

    let mut volumes = control_plane
        .find_volumes(name, zone)
        .context(ControlPlaneSnafu {
            operation: "DescribeVolumes",
        })?;

    if volumes.len() != 1 {
        return Err(Error::VolumeNotUniquelyIdentified {
            name: name.to_string(),
            zone: zone.to_string(),
            count: volumes.len(),
        });
    }

    let volume = volumes.remove(0);
    info!(
        "Found volume '{}' in instance AZ ({}) with ID: '{}'",
        name, zone, volume.id
    );
    Ok(volume)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Control plane double that records calls and replays scripted answers.
    #[derive(Default)]
    pub(crate) struct FakeControlPlane {
        pub(crate) found: RefCell<Option<std::result::Result<Vec<Volume>, ProviderError>>>,
        pub(crate) attach_result: RefCell<Option<ProviderError>>,
        pub(crate) polls: RefCell<VecDeque<std::result::Result<Option<Volume>, ProviderError>>>,
        pub(crate) attach_calls: RefCell<Vec<(String, String, String)>>,
        pub(crate) describe_calls: RefCell<usize>,
    }

    impl FakeControlPlane {
        pub(crate) fn with_volumes(volumes: Vec<Volume>) -> Self {
            let fake = Self::default();
            *fake.found.borrow_mut() = Some(Ok(volumes));
            fake
        }

        pub(crate) fn push_poll(&self, answer: std::result::Result<Option<Volume>, ProviderError>) {
            self.polls.borrow_mut().push_back(answer);
        }
    }

    impl ControlPlane for FakeControlPlane {
        fn find_volumes(
            &self,
            _name: &str,
            _zone: &str,
        ) -> std::result::Result<Vec<Volume>, ProviderError> {
            self.found
                .borrow_mut()
                .take()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        fn attach_volume(
            &self,
            volume_id: &str,
            instance_id: &str,
            device: &str,
        ) -> std::result::Result<(), ProviderError> {
            self.attach_calls.borrow_mut().push((
                volume_id.to_string(),
                instance_id.to_string(),
                device.to_string(),
            ));
            match self.attach_result.borrow_mut().take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        fn describe_volume(
            &self,
            _volume_id: &str,
        ) -> std::result::Result<Option<Volume>, ProviderError> {
            *self.describe_calls.borrow_mut() += 1;
            self.polls
                .borrow_mut()
                .pop_front()
                .expect("unscripted describe_volume call")
        }
    }

    pub(crate) fn volume(id: &str, attachments: Vec<Attachment>) -> Volume {
        Volume {
            id: id.to_string(),
            name: Some("data".to_string()),
            zone: "us-east-1a".to_string(),
            attachments,
        }
    }

    pub(crate) fn attachment(instance_id: &str, state: AttachmentState) -> Attachment {
        Attachment {
            instance_id: instance_id.to_string(),
            device: "/dev/xvdf".to_string(),
            state,
        }
    }

    #[test]
    fn test_locate_single_volume() {
        let fake = FakeControlPlane::with_volumes(vec![volume("vol-1", vec![])]);
        let found = locate_volume(&fake, "data", "us-east-1a").unwrap();
        assert_eq!(found.id, "vol-1");
    }

    #[test]
    fn test_locate_no_volume() {
        let fake = FakeControlPlane::with_volumes(vec![]);
        let err = locate_volume(&fake, "data", "us-east-1a").unwrap_err();
        assert!(matches!(
            err,
            Error::VolumeNotUniquelyIdentified { count: 0, .. }
        ));
    }

    #[test]
    fn test_locate_duplicate_volumes() {
        let fake = FakeControlPlane::with_volumes(vec![
            volume("vol-1", vec![]),
            volume("vol-2", vec![]),
        ]);
        let err = locate_volume(&fake, "data", "us-east-1a").unwrap_err();
        assert!(matches!(
            err,
            Error::VolumeNotUniquelyIdentified { count: 2, .. }
        ));
    }

    #[test]
    fn test_locate_forwards_provider_error() {
        let fake = FakeControlPlane::default();
        *fake.found.borrow_mut() = Some(Err(ProviderError::with_code(
            "RequestLimitExceeded",
            "Request limit exceeded.",
        )));

        let err = locate_volume(&fake, "data", "us-east-1a").unwrap_err();
        match err {
            Error::ControlPlane { operation, source } => {
                assert_eq!(operation, "DescribeVolumes");
                assert_eq!(source.code.as_deref(), Some("RequestLimitExceeded"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_attachment_state_parse() {
        assert_eq!(AttachmentState::parse("attached"), AttachmentState::Attached);
        assert_eq!(AttachmentState::parse("attaching"), AttachmentState::Attaching);
        assert!(AttachmentState::parse("attached").is_terminal());
        assert!(!AttachmentState::parse("busy").is_terminal());
        assert_eq!(AttachmentState::parse("busy").as_str(), "busy");
    }
}
