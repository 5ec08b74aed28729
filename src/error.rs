//! Error types for the Editgate service.
//!
//! Admission rejections are not errors: they are returned as decisions and
//! rendered as 429 responses. The variants below cover configuration, server
//! and downstream failures.

use thiserror::Error;

/// Main error type for Editgate operations.
#[derive(Error, Debug)]
pub enum EditGateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),

    /// The protected edit operation failed
    #[error("Edit backend error: {0}")]
    Backend(String),

    /// The protected edit operation did not finish in time
    #[error("Edit backend timed out after {0} ms")]
    Timeout(u64),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for EditGateError {
    fn from(err: ::config::ConfigError) -> Self {
        EditGateError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for EditGateError {
    fn from(err: reqwest::Error) -> Self {
        EditGateError::Backend(err.to_string())
    }
}

/// Result type alias for Editgate operations.
pub type Result<T> = std::result::Result<T, EditGateError>;
