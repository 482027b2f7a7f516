//! Logger collaborator for fail-open and exhausted-retry events.

use std::error::Error;

use tracing::{error, warn};

/// Context attached to limiter log events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogContext {
    /// Caller key being limited
    pub key: String,
    /// Limiter operation name
    pub operation: &'static str,
    /// Attempts made, for retry events
    pub attempts: Option<u32>,
    /// Message of the underlying failure, if any
    pub error: Option<String>,
}

impl LogContext {
    /// Create a context for `operation` on `key`.
    pub fn new(key: &str, operation: &'static str) -> Self {
        Self {
            key: key.to_string(),
            operation,
            attempts: None,
            error: None,
        }
    }

    /// Attach an attempt count.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Attach the underlying error message.
    pub fn with_error(mut self, error: &dyn Error) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Sink for the only two events the limiters report.
pub trait LimiterLogger: Send + Sync {
    /// A recoverable condition, e.g. a fail-open allow.
    fn warn(&self, message: &str, context: &LogContext);

    /// A failure the limiter swallowed, e.g. exhausted increment retries.
    fn error(&self, message: &str, error: &dyn Error, context: &LogContext);
}

/// Default logger forwarding to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl LimiterLogger for TracingLogger {
    fn warn(&self, message: &str, context: &LogContext) {
        warn!(
            key = %context.key,
            operation = context.operation,
            attempts = ?context.attempts,
            error = ?context.error,
            "{}",
            message
        );
    }

    fn error(&self, message: &str, err: &dyn Error, context: &LogContext) {
        error!(
            key = %context.key,
            operation = context.operation,
            attempts = ?context.attempts,
            error = %err,
            "{}",
            message
        );
    }
}
