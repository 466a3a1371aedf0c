//! Error types for the Ayinel rate limiting service.

use thiserror::Error;

/// Main error type for Ayinel rate limiting operations.
#[derive(Error, Debug)]
pub enum AyinelError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A policy with an out-of-range window or budget, or an unusable name
    #[error("Invalid rate limit policy: {0}")]
    InvalidPolicy(String),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for AyinelError {
    fn from(err: config::ConfigError) -> Self {
        AyinelError::Config(err.to_string())
    }
}

/// Result type alias for Ayinel operations.
pub type Result<T> = std::result::Result<T, AyinelError>;
