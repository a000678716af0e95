//! Core error types.

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while assembling the process configuration and identity.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A required environment variable is unset or empty.
    #[error("Missing required environment variable: {0}")]
    MissingVariable(&'static str),

    /// An environment variable holds a value that fails validation.
    #[error("Invalid value for {variable}: {message}")]
    InvalidVariable {
        /// The offending variable
        variable: &'static str,
        /// Why the value was rejected
        message: String,
    },
}

impl CoreError {
    /// Build an invalid-variable error naming the offending variable.
    pub fn invalid(variable: &'static str, message: impl Into<String>) -> Self {
        CoreError::InvalidVariable {
            variable,
            message: message.into(),
        }
    }
}
