//! Coordination-specific error types.

use thiserror::Error;

/// Result type for coordination operations.
pub type Result<T> = std::result::Result<T, CoordinationError>;

/// Errors surfaced by the coordination store and the components built on it.
///
/// `NotFound` is a command to create, not a failure; `Conflict` and
/// `Unavailable` are transient and retried on the next tick, never inside one.
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Optimistic concurrency conflict on {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Watch stream ended")]
    WatchClosed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid object: {0}")]
    InvalidObject(String),
}

impl CoordinationError {
    /// Whether this error is the not-found kind.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoordinationError::NotFound(_))
    }

    /// Whether this error is the optimistic-concurrency kind.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CoordinationError::Conflict(_))
    }
}
