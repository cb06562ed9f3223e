//! Error types for the add-on provisioning engine.
//!
//! This module provides the error hierarchy for every stage of an add-on's
//! lifecycle: configuration, request parameters, the cluster gateway, the
//! instance registry, and the provisioning saga itself.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::gateway::ResourceRef;

/// The main error type for the add-on engine.
#[derive(Debug, Error)]
pub enum AddonError {
    /// An instance with the same identity is already recorded.
    #[error("Addon instance already exists: {identity}")]
    DuplicateInstance {
        /// Identity of the existing instance.
        identity: String,
    },

    /// Another provision or deprovision call holds this identity.
    #[error("Addon instance is busy with another operation: {identity}")]
    InstanceBusy {
        /// Identity being operated on.
        identity: String,
    },

    /// A provisioning step failed; prior steps were compensated.
    #[error("Step '{step}' failed: {cause}{compensation}")]
    StepFailed {
        /// Name of the failed step.
        step: String,
        /// Cause of the failure.
        cause: String,
        /// Compensation failures encountered during rollback.
        compensation: CompensationReport,
    },

    /// A readiness condition did not become true in time.
    #[error("Readiness condition '{condition}' timed out{}{compensation}", last_error_suffix(.last_error.as_deref()))]
    ReadinessTimeout {
        /// Name of the readiness condition.
        condition: String,
        /// Last evaluation error, if any.
        last_error: Option<String>,
        /// Compensation failures encountered during rollback.
        compensation: CompensationReport,
    },

    /// The registry backend could not be reached.
    #[error("Addon registry unavailable: {message}")]
    RegistryUnavailable {
        /// Description of the backend failure.
        message: String,
    },

    /// The deprovision target is not recorded.
    #[error("Addon instance not found: {identity}")]
    InstanceNotFound {
        /// Identity that was looked up.
        identity: String,
    },

    /// Teardown stopped partway; the record is kept so a retry resumes.
    #[error(
        "Partial teardown of {identity}: deleted {} resource(s), {} remaining: {cause}",
        .deleted.len(),
        .remaining.len()
    )]
    PartialTeardown {
        /// Identity being torn down.
        identity: String,
        /// Resources deleted during this attempt.
        deleted: Vec<String>,
        /// Resources still present.
        remaining: Vec<String>,
        /// Cause of the failed deletion.
        cause: String,
    },

    /// Every resource was created but the instance record could not be written.
    #[error("Addon {identity} was provisioned but its record was lost: {cause}")]
    InstanceRecordLost {
        /// Identity of the provisioned instance.
        identity: String,
        /// Cause of the persistence failure.
        cause: String,
        /// Resources that exist in the cluster without a record.
        resources: Vec<ResourceRef>,
    },

    /// The caller cancelled the operation outside of any step.
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Invalid request parameters.
    #[error("Invalid parameters: {0}")]
    Params(#[from] ParamsError),

    /// Cluster gateway errors outside of a saga.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Registry errors that have no dedicated kind.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn last_error_suffix(last_error: Option<&str>) -> String {
    last_error.map_or_else(String::new, |e| format!(" (last error: {e})"))
}

/// A compensation that could not be completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensationFailure {
    /// Step whose compensation failed.
    pub step: String,
    /// Why the compensation failed.
    pub cause: String,
}

/// Compensation failures collected while rolling back a saga.
///
/// Resources named here may be orphaned in the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompensationReport {
    /// Failures in the order they were encountered.
    pub failures: Vec<CompensationFailure>,
}

impl CompensationReport {
    /// Returns true if every compensation succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for CompensationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return Ok(());
        }
        write!(f, " [compensation failed for")?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { " " } else { "; " };
            write!(f, "{sep}'{}': {}", failure.step, failure.cause)?;
        }
        write!(f, "]")
    }
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },
}

/// Invalid add-on request parameters.
#[derive(Debug, Error)]
pub enum ParamsError {
    /// A name is not a valid DNS-1123 label.
    #[error("Invalid {field} '{value}': must be a lowercase DNS-1123 label")]
    InvalidName {
        /// Field holding the name.
        field: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A numeric field is outside its allowed range.
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        /// Field holding the value.
        field: &'static str,
        /// The rejected value.
        value: i64,
        /// Inclusive lower bound.
        min: i64,
        /// Inclusive upper bound.
        max: i64,
    },

    /// A required field is missing.
    #[error("Missing required field: {field}")]
    Missing {
        /// Name of the missing field.
        field: &'static str,
    },

    /// A field value could not be decoded.
    #[error("Invalid {field}: {message}")]
    Invalid {
        /// Name of the field.
        field: &'static str,
        /// Why the value was rejected.
        message: String,
    },

    /// No operator preset exists under this name.
    #[error("Unknown operator preset: {name}")]
    UnknownOperator {
        /// Requested preset name.
        name: String,
    },
}

/// Errors returned by the cluster gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The object already exists.
    #[error("{kind} '{name}' already exists")]
    AlreadyExists {
        /// Kind of the object.
        kind: String,
        /// Name of the object.
        name: String,
    },

    /// The API server rejected the request.
    #[error("Cluster API request failed: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the API server.
        message: String,
    },

    /// The API server could not be reached.
    #[error("Cluster API transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// A manifest could not be converted to an API object.
    #[error("Invalid manifest: {message}")]
    InvalidManifest {
        /// Description of the problem.
        message: String,
    },

    /// A failure injected by the in-memory gateway.
    #[error("Injected failure: {message}")]
    Injected {
        /// Description of the injected failure.
        message: String,
    },
}

/// Addon instance registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No record exists for the identity.
    #[error("No record for {identity}")]
    NotFound {
        /// Identity that was looked up.
        identity: String,
    },

    /// A record already exists for the identity.
    #[error("A record already exists for {identity}")]
    Conflict {
        /// Identity being stored.
        identity: String,
    },

    /// The backend could not be reached or failed an operation.
    #[error("Registry backend unavailable: {message}")]
    Unavailable {
        /// Description of the backend failure.
        message: String,
    },

    /// A stored record could not be read back.
    #[error("Registry record is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// A record could not be serialized.
    #[error("Registry serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
    },
}

/// Errors returned by the readiness poller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PollError {
    /// The condition did not become true before the timeout.
    #[error("timed out after {elapsed:?}{}", last_error_suffix(.last_error.as_deref()))]
    Timeout {
        /// Time spent polling.
        elapsed: std::time::Duration,
        /// Last evaluation error, if any.
        last_error: Option<String>,
    },

    /// The caller cancelled the poll.
    #[error("polling cancelled")]
    Cancelled,
}

/// How seriously an error should be treated by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// The request was rejected; nothing changed.
    Rejected,
    /// The operation failed; the system is consistent.
    Failed,
    /// The cluster and the registry may disagree until someone intervenes.
    Critical,
}

/// Result type alias for add-on operations.
pub type Result<T> = std::result::Result<T, AddonError>;

impl AddonError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns a stable machine-readable code for this error kind.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DuplicateInstance { .. } => "duplicate_instance",
            Self::InstanceBusy { .. } => "instance_busy",
            Self::StepFailed { .. } => "step_failed",
            Self::ReadinessTimeout { .. } => "readiness_timeout",
            Self::RegistryUnavailable { .. } => "registry_unavailable",
            Self::InstanceNotFound { .. } => "instance_not_found",
            Self::PartialTeardown { .. } => "partial_teardown",
            Self::InstanceRecordLost { .. } => "instance_record_lost",
            Self::Cancelled => "cancelled",
            Self::Config(_) => "invalid_config",
            Self::Params(_) => "invalid_params",
            Self::Gateway(_) => "gateway_error",
            Self::Registry(_) => "registry_error",
            Self::Io(_) | Self::Internal(_) => "internal",
        }
    }

    /// Returns the severity of this error.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::InstanceRecordLost { .. } => Severity::Critical,
            Self::DuplicateInstance { .. }
            | Self::InstanceBusy { .. }
            | Self::InstanceNotFound { .. }
            | Self::Config(_)
            | Self::Params(_) => Severity::Rejected,
            _ => Severity::Failed,
        }
    }

    /// Returns true if repeating the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InstanceBusy { .. }
                | Self::RegistryUnavailable { .. }
                | Self::PartialTeardown { .. }
                | Self::ReadinessTimeout { .. }
                | Self::Gateway(GatewayError::Transport { .. })
        )
    }

    /// Returns the compensation report attached to a saga failure.
    #[must_use]
    pub const fn compensation(&self) -> Option<&CompensationReport> {
        match self {
            Self::StepFailed { compensation, .. } | Self::ReadinessTimeout { compensation, .. } => {
                Some(compensation)
            }
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl GatewayError {
    /// Creates an API error.
    #[must_use]
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Creates a transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an invalid manifest error.
    #[must_use]
    pub fn invalid_manifest(message: impl Into<String>) -> Self {
        Self::InvalidManifest {
            message: message.into(),
        }
    }
}

impl RegistryError {
    /// Creates an unavailable error with the given message.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}
