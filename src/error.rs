//! Error types for the Tollgate library.

use std::time::Duration;
use thiserror::Error;

use crate::config::OperationClass;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;

/// Error raised when a call is throttled.
///
/// This is the only error type the rate limiting layer manufactures. It is
/// raised both for local token bucket denials and for remote throttling
/// reported by the backend, so callers branch on a single type regardless
/// of where the limit was enforced.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error(
    "Rate limit exceeded for {class} operations. Please try again in {} seconds.",
    .retry_after.as_secs()
)]
pub struct RateLimitError {
    /// The operation class that was throttled.
    pub class: OperationClass,
    /// How long the caller should wait before retrying.
    pub retry_after: Duration,
    /// The `max_requests` ceiling of the throttled class.
    pub limit: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_error_display() {
        let err = RateLimitError {
            class: OperationClass::Write,
            retry_after: Duration::from_secs(12),
            limit: 30,
        };

        assert_eq!(
            err.to_string(),
            "Rate limit exceeded for write operations. Please try again in 12 seconds."
        );
    }
}
