//! Supervisor error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Errors raised by the supervisor and its components.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The supervisor cannot meet its contract without the source files.
    #[error("Credential source missing or unreadable: {path}")]
    SourceMissing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Coordination error: {0}")]
    Coordination(#[from] forgeguard_coordination::CoordinationError),

    #[error("Configuration error: {0}")]
    Config(#[from] forgeguard_core::CoreError),

    #[error("Failed to signal node process {pid}: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: nix::Error,
    },

    #[error("HTTP server error: {0}")]
    Http(String),

    #[error("Task failure: {0}")]
    Task(String),
}
