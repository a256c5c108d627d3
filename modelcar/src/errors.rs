//! Error types for the modelcar pipeline engine.
//!
//! The taxonomy separates definition problems (surfaced before any stage
//! runs) from stage-local failures (retried according to the stage policy),
//! storage and registry failures, and cancellation.

use crate::core::ArtifactLocation;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The main error type for modelcar operations.
#[derive(Debug, Error)]
pub enum ModelcarError {
    /// The pipeline definition or run request is invalid.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A stage failed.
    #[error("{0}")]
    Stage(#[from] StageError),

    /// An artifact store operation failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// A registry operation failed.
    #[error("{0}")]
    Registry(#[from] RegistryError),

    /// The run was cancelled.
    #[error("{0}")]
    Cancelled(#[from] CancellationError),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ModelcarError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for ModelcarError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "DEF-003-DANGLING_INPUT").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a pipeline definition or run request fails validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error. The first entry is the offending stage.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the offending stage, if the error is attributed to one.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        self.stages.first().map(String::as_str)
    }

    /// Returns the contract error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Error raised when stage references form a cycle.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of stages forming the cycle.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "DEF-004-CYCLE",
            format!("Stage references form a cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Stages may only consume outputs of strictly earlier stages.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

impl From<CycleDetectedError> for PipelineValidationError {
    fn from(err: CycleDetectedError) -> Self {
        Self {
            message: err.to_string(),
            stages: err.cycle_path.clone(),
            error_info: Some(err.error_info),
        }
    }
}

/// Error raised when run parameters do not match the parameter schema.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParameterError {
    /// A required parameter was not provided and has no default.
    #[error("Missing required parameter '{name}'")]
    Missing {
        /// The parameter name.
        name: String,
    },

    /// A parameter was provided that the definition does not declare.
    #[error("Unknown parameter '{name}'")]
    Unknown {
        /// The parameter name.
        name: String,
    },

    /// A parameter value has the wrong type.
    #[error("Parameter '{name}' expects {expected}, got {actual}")]
    TypeMismatch {
        /// The parameter name.
        name: String,
        /// The declared type.
        expected: String,
        /// The provided value.
        actual: String,
    },
}

impl From<ParameterError> for PipelineValidationError {
    fn from(err: ParameterError) -> Self {
        let code = match err {
            ParameterError::Missing { .. } => "PARAM-001-MISSING",
            ParameterError::Unknown { .. } => "PARAM-002-UNKNOWN",
            ParameterError::TypeMismatch { .. } => "PARAM-003-TYPE",
        };
        Self::new(err.to_string()).with_error_info(ContractErrorInfo::new(code, err.to_string()))
    }
}

/// Error returned by a stage body.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    /// A failure that may succeed on retry (network, throttling).
    #[error("Transient stage error: {0}")]
    Transient(String),

    /// A failure that will not succeed on retry.
    #[error("Permanent stage error: {0}")]
    Permanent(String),

    /// The attempt exceeded its timeout.
    #[error("Stage attempt timed out after {timeout_ms}ms")]
    TimedOut {
        /// The configured timeout.
        timeout_ms: u64,
    },

    /// The attempt observed the cancellation signal.
    #[error("Stage cancelled: {0}")]
    Cancelled(String),
}

impl StageError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Creates a permanent error.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// Returns true if the stage retry policy applies to this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::TimedOut { .. })
    }

    /// Returns the error kind used in run records.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient(_) => ErrorKind::Transient,
            Self::Permanent(_) => ErrorKind::Permanent,
            Self::TimedOut { .. } => ErrorKind::TimedOut,
            Self::Cancelled(_) => ErrorKind::Cancelled,
        }
    }
}

/// Error returned by an artifact store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Network or throttling failure; retryable.
    #[error("Transient store error: {0}")]
    Transient(String),

    /// Bad credentials, path conflict or corrupt data; not retryable.
    #[error("Permanent store error: {0}")]
    Permanent(String),
}

impl StoreError {
    /// Creates a transient store error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Creates a permanent store error.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }
}

impl From<StoreError> for StageError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Transient(msg) => Self::Transient(msg),
            StoreError::Permanent(msg) => Self::Permanent(msg),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        match err.kind() {
            Io::Interrupted | Io::TimedOut | Io::WouldBlock | Io::ConnectionReset
            | Io::ConnectionAborted | Io::BrokenPipe => Self::Transient(err.to_string()),
            _ => Self::Permanent(err.to_string()),
        }
    }
}

/// Error returned by a registry client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The version is already bound to a different location.
    #[error("Model '{name}' version '{version}' is already registered at {existing} (requested {requested})")]
    Conflict {
        /// Model name.
        name: String,
        /// Model version.
        version: String,
        /// The location already on record.
        existing: ArtifactLocation,
        /// The location that was requested.
        requested: ArtifactLocation,
    },

    /// The registry could not be reached; retryable.
    #[error("Registry unavailable: {0}")]
    Unavailable(String),

    /// The registry rejected the request.
    #[error("Invalid registration: {0}")]
    Invalid(String),
}

impl RegistryError {
    /// Returns true if the registration step may retry this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Returns the error kind used in run records.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Invalid(_) => ErrorKind::Permanent,
        }
    }
}

/// Error raised when a run is stopped by the cancellation signal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Run cancelled: {reason}")]
pub struct CancellationError {
    /// The cancellation reason.
    pub reason: String,
}

impl CancellationError {
    /// Creates a new cancellation error.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Classification of an error as recorded in run history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Definition or request validation.
    Validation,
    /// Retryable stage failure.
    Transient,
    /// Non-retryable stage failure.
    Permanent,
    /// Attempt timeout.
    TimedOut,
    /// Registration collision.
    Conflict,
    /// Registry unavailable.
    Unavailable,
    /// Cancellation signal.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::TimedOut => "timed_out",
            Self::Conflict => "conflict",
            Self::Unavailable => "unavailable",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Serializable summary of an error for run records and events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    /// The error kind.
    pub kind: ErrorKind,
    /// The rendered error message.
    pub message: String,
}

impl ErrorSummary {
    /// Creates a new error summary.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&StageError> for ErrorSummary {
    fn from(err: &StageError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<&RegistryError> for ErrorSummary {
    fn from(err: &RegistryError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl fmt::Display for ErrorSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}
