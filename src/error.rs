//! Error types for Ratewarden.

use std::time::Duration;

use thiserror::Error;

/// Failure reported by a storage driver.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend call did not complete within the configured timeout
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    /// Generic store failure (network, unavailable, rejected write)
    #[error("store error: {0}")]
    Store(String),

    /// A stored entry could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Redis driver errors
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Main error type for Ratewarden operations.
#[derive(Error, Debug)]
pub enum RateLimitError {
    /// A backend failed and the limit was configured to fail closed
    #[error("backend unavailable during {operation}: {source}")]
    BackendUnavailable {
        /// Limiter operation that was running
        operation: &'static str,
        /// Underlying driver failure
        #[source]
        source: BackendError,
    },

    /// Every increment attempt failed write verification or errored
    #[error("increment retries exhausted after {attempts} attempts")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
    },

    /// A rate limit config that can never produce meaningful results
    #[error("invalid rate limit config: {0}")]
    ConfigInvalid(String),

    /// Settings loading errors
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RateLimitError {
    /// Wrap a driver failure for the given operation.
    pub fn backend(operation: &'static str, source: BackendError) -> Self {
        RateLimitError::BackendUnavailable { operation, source }
    }
}

/// Result type alias for Ratewarden operations.
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Result type alias for storage driver calls.
pub type BackendResult<T> = std::result::Result<T, BackendError>;
