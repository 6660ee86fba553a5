//! Error types for Turnstile.

use thiserror::Error;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// A group has no remaining capacity in its current window
    #[error(
        "Rate limit exceeded for group '{group}'; resets at {reset_time_millis}ms ({remaining_requests} remaining)"
    )]
    RateLimitExceeded {
        /// The group whose capacity is exhausted
        group: String,
        /// Epoch milliseconds at which the window resets
        reset_time_millis: i64,
        /// Requests left in the window (always 0 when raised)
        remaining_requests: u32,
    },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure to assemble a synthesized response
    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),

    /// Failure to encode a problem body
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Errors raised by the downstream pipeline or transport
    #[error("Downstream error: {0}")]
    Downstream(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TurnstileError {
    /// Wrap an arbitrary transport failure.
    pub fn downstream<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        TurnstileError::Downstream(error.into())
    }

    /// Whether this error is a rate limit denial.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TurnstileError::RateLimitExceeded { .. })
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
