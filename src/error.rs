//! Error types for the Turnstile limiter.

use thiserror::Error;

/// Main error type for Turnstile operations.
///
/// Admission decisions never fail; these errors only surface while building
/// a limiter or loading its configuration.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A window or quota that cannot describe a usable policy
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for TurnstileError {
    fn from(err: config::ConfigError) -> Self {
        TurnstileError::Config(err.to_string())
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
