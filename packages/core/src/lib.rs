//! evm-core: Core library for EBS volume attachment and mounting.
//!
//! This library attaches a named EBS volume to the EC2 instance it runs on
//! and makes sure the resulting block device is formatted and mounted,
//! doing only the steps that the current state requires.
//!
//! # Modules
//!
//! - [`identity`]: Instance id, zone and region from the metadata service
//! - [`volume`]: Volume model and name/zone lookup
//! - [`attach`]: Attachment classification, attach request, confirmation polling
//! - [`provision`]: Idempotent format and mount of the local block device
//! - [`reconcile`]: The full run, in order
//! - [`metadata`]: Instance metadata service client
//! - [`ec2`]: EC2 Query API client
//! - [`credentials`] / [`sigv4`]: Request signing
//! - [`disk`]: Block device scanning using `lsblk`
//! - [`mount`]: `mkfs` and `mount(2)` wrappers
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```no_run
//! use evm_core::attach::PollPolicy;
//! use evm_core::backoff::SystemClock;
//! use evm_core::credentials::Credentials;
//! use evm_core::ec2::Ec2Client;
//! use evm_core::host::SystemHost;
//! use evm_core::metadata::{DEFAULT_ENDPOINT, ImdsClient};
//! use evm_core::reconcile::{Environment, ReconcileInput, reconcile};
//!
//! let metadata = ImdsClient::new(DEFAULT_ENDPOINT);
//! let env = Environment {
//!     metadata: &metadata,
//!     host: &SystemHost,
//!     clock: &SystemClock,
//!     poll_policy: PollPolicy::default(),
//! };
//! let input = ReconcileInput {
//!     device_name: "/dev/xvdf".to_string(),
//!     filesystem_type: "ext4".to_string(),
//!     mount_point: "/data".to_string(),
//!     volume_name: "database".to_string(),
//! };
//!
//! // Requires root on an EC2 instance:
//! let outcome = reconcile(input, &env, |identity| {
//!     Ok(Ec2Client::new(&identity.region, Credentials::resolve(&metadata)?))
//! })
//! .unwrap();
//! println!("volume {} is ready", outcome.volume_id);
//! ```

pub mod attach;
pub mod backoff;
pub mod credentials;
pub mod disk;
pub mod ec2;
pub mod error;
pub mod executor;
pub mod host;
pub mod identity;
pub mod metadata;
pub mod mount;
pub mod provision;
pub mod reconcile;
pub mod sigv4;
pub mod volume;

// Re-export commonly used types
pub use attach::{AttachOutcome, AttachmentStatus, PollPolicy};
pub use disk::LocalDeviceInfo;
pub use error::{Error, ProviderError, Result};
pub use identity::InstanceIdentity;
pub use reconcile::{Environment, Outcome, ReconcileInput, reconcile};
pub use volume::{Attachment, AttachmentState, ControlPlane, Volume};
