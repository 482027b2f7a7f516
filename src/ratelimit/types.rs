//! Shared rate limit vocabulary used by every backend.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RateLimitError, Result};

/// Limit applied to a single caller key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests allowed in the window
    pub max_requests: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Extra requests permitted on top of `max_requests`
    #[serde(default)]
    pub burst_allowance: u32,
    /// Allow requests through when the backend fails
    #[serde(default = "default_fail_open")]
    pub fail_open: bool,
}

fn default_fail_open() -> bool {
    true
}

impl RateLimitConfig {
    /// Create a config with no burst allowance that fails open.
    pub fn new(max_requests: u32, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
            burst_allowance: 0,
            fail_open: true,
        }
    }

    /// Set the burst allowance.
    pub fn with_burst(mut self, burst_allowance: u32) -> Self {
        self.burst_allowance = burst_allowance;
        self
    }

    /// Set the fail-open policy.
    pub fn with_fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    /// `max_requests + burst_allowance`.
    pub fn effective_limit(&self) -> u64 {
        u64::from(self.max_requests) + u64::from(self.burst_allowance)
    }

    /// Reject configs that would produce nonsensical results.
    pub fn validate(&self) -> Result<()> {
        if self.max_requests == 0 {
            return Err(RateLimitError::ConfigInvalid(
                "max_requests must be greater than zero".to_string(),
            ));
        }
        if self.window_ms == 0 {
            return Err(RateLimitError::ConfigInvalid(
                "window_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(100, 60_000)
    }
}

/// Outcome of a rate limit evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitResult {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u64,
    /// Epoch milliseconds at which the current window ends
    pub reset_at_ms: u64,
    /// Effective limit the decision was made against
    pub limit: u64,
    /// Seconds to wait before retrying, only set when denied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    /// Set when a backend failure caused a fail-open allow
    #[serde(default)]
    pub backend_error: bool,
}

impl RateLimitResult {
    /// An allowed result.
    pub fn allowed(limit: u64, remaining: u64, reset_at_ms: u64) -> Self {
        Self {
            allowed: true,
            remaining: remaining.min(limit),
            reset_at_ms,
            limit,
            retry_after_secs: None,
            backend_error: false,
        }
    }

    /// A denied result; `retry_after_secs` is computed from `now_ms`.
    pub fn denied(limit: u64, reset_at_ms: u64, now_ms: u64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_at_ms,
            limit,
            retry_after_secs: Some(retry_after_secs(reset_at_ms, now_ms)),
            backend_error: false,
        }
    }

    /// The allow returned when a backend failure is swallowed.
    pub fn fail_open(config: &RateLimitConfig, now_ms: u64) -> Self {
        let limit = config.effective_limit();
        Self {
            allowed: true,
            remaining: limit,
            reset_at_ms: now_ms.saturating_add(config.window_ms),
            limit,
            retry_after_secs: None,
            backend_error: true,
        }
    }

    /// Window end as a UTC timestamp.
    pub fn reset_at(&self) -> DateTime<Utc> {
        let millis = i64::try_from(self.reset_at_ms).unwrap_or(i64::MAX);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Window end in Unix seconds, rounded up.
    pub fn reset_at_unix_secs(&self) -> u64 {
        self.reset_at_ms.div_ceil(1000)
    }
}

/// Whole seconds until `reset_at_ms`, never less than one.
pub(crate) fn retry_after_secs(reset_at_ms: u64, now_ms: u64) -> u64 {
    reset_at_ms.saturating_sub(now_ms).div_ceil(1000).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_limit_includes_burst() {
        let config = RateLimitConfig::new(5, 60_000).with_burst(3);
        assert_eq!(config.effective_limit(), 8);
        assert_eq!(RateLimitConfig::new(5, 60_000).effective_limit(), 5);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(RateLimitConfig::new(0, 1000).validate().is_err());
        assert!(RateLimitConfig::new(1, 0).validate().is_err());
        assert!(RateLimitConfig::new(1, 1).validate().is_ok());
    }

    #[test]
    fn test_config_serde_defaults() {
        let config: RateLimitConfig =
            serde_json::from_str(r#"{"max_requests": 5, "window_ms": 1000}"#).unwrap();
        assert_eq!(config.burst_allowance, 0);
        assert!(config.fail_open);
    }

    #[test]
    fn test_denied_retry_after() {
        let result = RateLimitResult::denied(5, 61_000, 1_000);
        assert!(!result.allowed);
        assert_eq!(result.remaining, 0);
        assert_eq!(result.retry_after_secs, Some(60));

        // Sub-second waits still advertise one second.
        let result = RateLimitResult::denied(5, 1_200, 1_000);
        assert_eq!(result.retry_after_secs, Some(1));
    }

    #[test]
    fn test_fail_open_result() {
        let config = RateLimitConfig::new(5, 60_000).with_burst(2);
        let result = RateLimitResult::fail_open(&config, 1_000);
        assert!(result.allowed);
        assert!(result.backend_error);
        assert_eq!(result.remaining, 7);
        assert_eq!(result.limit, 7);
        assert_eq!(result.reset_at_ms, 61_000);
    }

    #[test]
    fn test_reset_at_conversions() {
        let result = RateLimitResult::allowed(5, 4, 1_700_000_000_500);
        assert_eq!(result.reset_at_unix_secs(), 1_700_000_001);
        assert_eq!(result.reset_at().timestamp_millis(), 1_700_000_000_500);
    }
}
