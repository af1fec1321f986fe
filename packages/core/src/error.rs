//! Unified error types for the evm-core library.
//!
//! Uses SNAFU for context-rich error handling. Every failure of a
//! reconciliation run is terminal, so each variant maps to one abort reason.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use snafu::{ResultExt, Snafu};

/// Result type alias using the library's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// An error reported by the metadata service or the control-plane API.
///
/// Carried verbatim so operators see exactly what the provider said.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    /// Machine-readable error code, when the provider supplied one.
    pub code: Option<String>,
    /// Human-readable message.
    pub message: String,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{}: {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Unified error type for all core library operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The process does not hold the privilege needed to format and mount.
    #[snafu(display("you have to run this as root (effective uid is {uid})"))]
    PrivilegeCheckFailed { uid: u32 },

    /// A required parameter is empty or malformed.
    #[snafu(display("invalid input: {message}"))]
    InvalidInput { message: String },

    /// The metadata service cannot be reached.
    #[snafu(display(
        "unable to access the metadata service, are you running this from an EC2 instance? ({message})"
    ))]
    MetadataUnavailable { message: String },

    /// A specific metadata key could not be retrieved.
    #[snafu(display("failed to look up metadata key '{key}': {source}"))]
    MetadataLookupFailed { key: String, source: ProviderError },

    /// No usable control-plane credentials were found.
    #[snafu(display("failed to resolve credentials: {message}"))]
    Credentials { message: String },

    /// A control-plane call failed.
    #[snafu(display("{operation} failed: {source}"))]
    ControlPlane {
        operation: &'static str,
        source: ProviderError,
    },

    /// The name/zone lookup did not match exactly one volume.
    #[snafu(display(
        "unexpected amount of volumes named '{name}' in '{zone}': {count}, expected 1"
    ))]
    VolumeNotUniquelyIdentified {
        name: String,
        zone: String,
        count: usize,
    },

    /// The volume reports more than one attachment.
    #[snafu(display(
        "unexpected amount of attachments on volume '{volume_id}': {count}, expected 0 or 1"
    ))]
    UnexpectedAttachmentCardinality { volume_id: String, count: usize },

    /// The volume is attached to another instance.
    #[snafu(display("volume '{volume_id}' is attached onto another instance: '{instance_id}'"))]
    VolumeAttachedElsewhere {
        volume_id: String,
        instance_id: String,
    },

    /// The provider refused the attach request.
    #[snafu(display("attach request for volume '{volume_id}' rejected: {source}"))]
    AttachRequestRejected {
        volume_id: String,
        source: ProviderError,
    },

    /// The attachment did not settle before the configured deadline.
    #[snafu(display(
        "volume '{volume_id}' was not attached after {}s",
        elapsed.as_secs()
    ))]
    AttachTimeout {
        volume_id: String,
        elapsed: Duration,
    },

    /// The OS does not expose the requested block device.
    #[snafu(display("block device '{device}' not found on the system"))]
    BlockDeviceNotFound { device: String },

    /// Failed to execute a system command.
    #[snafu(display("failed to execute command '{command}'"))]
    CommandExecution {
        command: String,
        source: std::io::Error,
    },

    /// Command executed but returned non-zero exit code.
    #[snafu(display("command '{command}' exited with code {code}: {stderr}"))]
    CommandExit {
        command: String,
        code: i32,
        stderr: String,
    },

    /// Failed to parse lsblk JSON output.
    #[snafu(display("failed to parse lsblk output: {message}"))]
    LsblkParse { message: String },

    /// The filesystem creation utility failed.
    #[snafu(display("failed to format '{device}' as {fstype} (exit code {code}): {output}"))]
    FormatFailed {
        device: String,
        fstype: String,
        code: i32,
        output: String,
    },

    /// Mount point creation failed.
    #[snafu(display("failed to create mount point at {}", path.display()))]
    MountPointCreation {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Mount operation failed.
    #[snafu(display("failed to mount '{device}' on '{mount_point}': {message}"))]
    MountFailed {
        device: String,
        mount_point: String,
        message: String,
    },
}

/// Extension trait for adding context to io::Error results.
pub trait IoResultExt<T> {
    /// Add context for command execution errors.
    fn command_context(self, command: impl Into<String>) -> Result<T>;

    /// Add context for mount point creation errors.
    fn mount_point_context(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, std::io::Error> {
    fn command_context(self, command: impl Into<String>) -> Result<T> {
        self.context(CommandExecutionSnafu {
            command: command.into(),
        })
    }

    fn mount_point_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(MountPointCreationSnafu { path: path.into() })
    }
}
