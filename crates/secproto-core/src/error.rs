//! Error types for secproto
//!
//! Two layers:
//! - [`ChannelError`] for failures reported by the remote collaborators
//!   (command channel, protocol probe, service manager, inventory)
//! - [`ReconfigError`] for everything the orchestrator can run into while
//!   reconfiguring a host
//!
//! Errors never cross the per-host boundary: the orchestrator turns them into
//! report entries tagged with a [`FailureKind`].

use crate::protocol::ProtocolSet;
use crate::service::ServiceId;
use serde::{Deserialize, Serialize};

/// Failure reported by a remote collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// Command channel could not be opened
    #[error("cannot open channel to {address}: {reason}")]
    Open { address: String, reason: String },

    /// Command could not be executed at all
    #[error("cannot execute `{command}`: {reason}")]
    Execution { command: String, reason: String },

    /// Channel already closed
    #[error("channel closed")]
    Closed,

    /// Protocol probe could not complete a handshake scan
    #[error("probe of {address}:{port} failed: {reason}")]
    Probe {
        address: String,
        port: u16,
        reason: String,
    },

    /// Service manager call failed
    #[error("service manager call for {service} failed: {reason}")]
    ServiceManager { service: String, reason: String },

    /// Inventory login or lookup failed
    #[error("inventory error: {0}")]
    Inventory(String),
}

/// Main reconfiguration error type
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReconfigError {
    /// Remote collaborator failure
    #[error("connectivity failure: {0}")]
    Connectivity(#[from] ChannelError),

    /// Command ran but reported an error on stderr
    #[error("command `{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Host release is outside the supported baselines
    #[error("host version not supported: {detail}")]
    VersionUnsupported { detail: String },

    /// Legacy enable requested without the full modern baseline present
    #[error("cannot enable legacy protocol on {service}: current {current} lacks required {required}")]
    InvalidProtocolCombination {
        service: ServiceId,
        current: ProtocolSet,
        required: ProtocolSet,
    },

    /// Post-change scan differs from the target set
    #[error("validation mismatch on {service}: expected {expected}, observed {observed}")]
    ValidationMismatch {
        service: ServiceId,
        expected: ProtocolSet,
        observed: ProtocolSet,
    },

    /// Config backup could not be taken or verified
    #[error("backup of {path} could not be verified")]
    BackupFailure { path: String },

    /// Rollback of a service failed
    #[error("restore of {service} failed: {reason}")]
    RestoreFailure { service: ServiceId, reason: String },

    /// Output of a remote query could not be interpreted
    #[error("malformed output from `{command}`: {detail}")]
    MalformedOutput { command: String, detail: String },

    /// Background process backing a service is not available
    #[error("service process {process} is not running and could not be started")]
    ServiceUnavailable { process: String },

    /// Restart/stop/start of a process did not reach the expected state
    #[error("process {process} did not reach state {state}")]
    ProcessControl { process: String, state: String },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl ReconfigError {
    /// Classify into the reportable failure taxonomy
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Connectivity(_) | Self::CommandFailed { .. } | Self::ProcessControl { .. } => {
                FailureKind::Connectivity
            }
            Self::VersionUnsupported { .. } => FailureKind::VersionUnsupported,
            Self::InvalidProtocolCombination { .. } => FailureKind::InvalidProtocolCombination,
            Self::ValidationMismatch { .. } => FailureKind::ValidationMismatch,
            Self::BackupFailure { .. } => FailureKind::BackupFailure,
            Self::RestoreFailure { .. } => FailureKind::RestoreFailure,
            Self::MalformedOutput { .. } => FailureKind::MalformedOutput,
            Self::ServiceUnavailable { .. } => FailureKind::ServiceUnavailable,
            Self::Config(_) => FailureKind::Configuration,
        }
    }

    /// True when the error was raised before any mutating command ran
    #[inline]
    #[must_use]
    pub fn is_pre_change(&self) -> bool {
        matches!(
            self,
            Self::InvalidProtocolCombination { .. }
                | Self::BackupFailure { .. }
                | Self::ServiceUnavailable { .. }
                | Self::VersionUnsupported { .. }
        )
    }
}

/// Failure taxonomy carried in host reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Channel open or command execution failure
    Connectivity,
    /// Host skipped because its version is not supported
    VersionUnsupported,
    /// Legacy enable without full modern baseline
    InvalidProtocolCombination,
    /// Post-change scan did not match exactly
    ValidationMismatch,
    /// Backup not verifiable before an edit
    BackupFailure,
    /// Rollback itself failed
    RestoreFailure,
    /// Remote output could not be parsed
    MalformedOutput,
    /// Backing process unavailable
    ServiceUnavailable,
    /// Bad configuration
    Configuration,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Connectivity => "connectivity",
            Self::VersionUnsupported => "version-unsupported",
            Self::InvalidProtocolCombination => "invalid-protocol-combination",
            Self::ValidationMismatch => "validation-mismatch",
            Self::BackupFailure => "backup-failure",
            Self::RestoreFailure => "restore-failure",
            Self::MalformedOutput => "malformed-output",
            Self::ServiceUnavailable => "service-unavailable",
            Self::Configuration => "configuration",
        };
        f.write_str(label)
    }
}
