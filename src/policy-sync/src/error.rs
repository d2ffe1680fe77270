//! Error types for the policy synchronization engine

use std::time::Duration;
use thiserror::Error;

/// Kind reported by [`UpdaterError::NotFound`] when a referenced identity vanished
pub const PRINCIPAL_KIND: &str = "principal";

/// Errors a resource updater may report back to the engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdaterError {
    /// Remote quota exhausted (HTTP 429 or equivalent)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Optimistic concurrency check failed (stale version token)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Something the policy refers to does not exist
    #[error("{kind} not found: {message}")]
    NotFound { kind: String, message: String },

    /// Any other transport failure
    #[error("Transport error: {message}")]
    Transport { message: String, transient: bool },
}

impl UpdaterError {
    /// A `NotFound` for a principal referenced by the policy
    pub fn principal_not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            kind: PRINCIPAL_KIND.to_string(),
            message: message.into(),
        }
    }

    /// A transport failure that is worth retrying on reads
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            transient: true,
        }
    }

    /// A transport failure that will not go away by retrying
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            transient: false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_principal_not_found(&self) -> bool {
        matches!(self, Self::NotFound { kind, .. } if kind == PRINCIPAL_KIND)
    }

    /// Whether the read path should retry after this error
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited(_) => true,
            Self::Transport { transient, .. } => *transient,
            _ => false,
        }
    }
}

/// Errors surfaced to callers of the engine and the batcher
///
/// Every resource-scoped variant carries the updater's description so
/// operators can tell which resource failed.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// Conflict budget exhausted
    #[error("Error applying IAM policy to {resource}: too many conflicts, latest error: {source}")]
    TooManyConflicts {
        resource: String,
        #[source]
        source: UpdaterError,
    },

    /// The write never became visible within the propagation budget
    #[error("Error applying IAM policy to {resource}: waited too long for propagation")]
    PropagationTimeout { resource: String },

    /// Read retries ran out of time
    #[error("Error retrieving IAM policy for {resource} after {elapsed:?}: {source}")]
    ReadTimeout {
        resource: String,
        elapsed: Duration,
        #[source]
        source: UpdaterError,
    },

    /// Non-retryable updater failure
    #[error("Error applying IAM policy for {resource}: {source}")]
    Updater {
        resource: String,
        #[source]
        source: UpdaterError,
    },

    /// Caller gave up waiting for a batch flush
    #[error("Batch request {description} for {resource} ({key}) timed out after {timeout:?}")]
    BatchTimeout {
        resource: String,
        key: String,
        description: String,
        timeout: Duration,
    },

    /// Flush task went away without reporting an outcome
    #[error("Batch request {description} for {resource} ({key}) was dropped before completion")]
    BatchAborted {
        resource: String,
        key: String,
        description: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SyncError {
    /// Description of the resource this error refers to
    pub fn resource(&self) -> Option<&str> {
        match self {
            Self::TooManyConflicts { resource, .. }
            | Self::PropagationTimeout { resource }
            | Self::ReadTimeout { resource, .. }
            | Self::Updater { resource, .. }
            | Self::BatchTimeout { resource, .. }
            | Self::BatchAborted { resource, .. } => Some(resource),
            Self::InvalidConfig(_) => None,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

/// Result type for synchronization operations
pub type Result<T> = std::result::Result<T, SyncError>;
