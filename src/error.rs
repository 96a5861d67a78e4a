use std::time::Duration;

use thiserror::Error;

use crate::budget::BudgetKind;

/// Coarse classification of every [`RlmError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Bad id, bad argument, bad pattern.
    Validation,
    /// A budget ceiling denied the operation.
    Capacity,
    /// Sandbox denial, timeout, or fault.
    Execution,
    /// Sub-query backend failure.
    Backend,
    /// Snapshot or file failure.
    Persistence,
    /// Session state forbids the operation.
    State,
    /// Anything else (configuration, internal).
    Internal,
}

#[derive(Error, Debug)]
pub enum RlmError {
    #[error("Unknown context: {id}")]
    UnknownContext { id: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid pattern \"{pattern}\": {message}")]
    Pattern { pattern: String, message: String },

    #[error("Budget exceeded: {kind} (consumed {consumed}, limit {limit})")]
    BudgetExceeded {
        kind: BudgetKind,
        consumed: f64,
        limit: f64,
    },

    #[error("Denied capability: operation {operation} requires {capability}")]
    DeniedCapability {
        operation: String,
        capability: String,
    },

    #[error("Execution timed out after {}ms", timeout.as_millis())]
    ExecutionTimeout {
        timeout: Duration,
        partial_output: String,
    },

    #[error("Execution fault at line {line}: {message}")]
    ExecutionFault { line: usize, message: String },

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Backend error: backend={backend}, {message}")]
    Backend { backend: String, message: String },

    #[error("Backend timed out: backend={backend}, after {}ms", timeout.as_millis())]
    BackendTimeout { backend: String, timeout: Duration },

    #[error("Corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("Session {session_id} is finalized")]
    SessionFinalized { session_id: String },

    #[error("Duplicate id: {id}")]
    DuplicateId { id: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl RlmError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RlmError::UnknownContext { .. }
            | RlmError::InvalidArgument(_)
            | RlmError::Pattern { .. } => ErrorCategory::Validation,
            RlmError::BudgetExceeded { .. } => ErrorCategory::Capacity,
            RlmError::DeniedCapability { .. }
            | RlmError::ExecutionTimeout { .. }
            | RlmError::ExecutionFault { .. } => ErrorCategory::Execution,
            RlmError::BackendUnavailable(_)
            | RlmError::Backend { .. }
            | RlmError::BackendTimeout { .. }
            | RlmError::Http(_) => ErrorCategory::Backend,
            RlmError::CorruptSnapshot(_) | RlmError::Serialization(_) | RlmError::Io(_) => {
                ErrorCategory::Persistence
            }
            RlmError::SessionFinalized { .. } | RlmError::DuplicateId { .. } => {
                ErrorCategory::State
            }
            RlmError::Config(_) | RlmError::Other(_) => ErrorCategory::Internal,
        }
    }

    pub(crate) fn pattern(pattern: &str, err: impl std::fmt::Display) -> Self {
        RlmError::Pattern {
            pattern: pattern.to_string(),
            message: err.to_string(),
        }
    }
}

pub type RlmResult<T> = Result<T, RlmError>;
