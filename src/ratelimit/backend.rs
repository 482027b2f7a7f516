//! Rate limiter traits shared by the memory, eventual and atomic backends.

use async_trait::async_trait;

use super::types::{RateLimitConfig, RateLimitResult};
use crate::error::Result;

/// Trait for rate limiter implementations.
///
/// A denied request is `Ok` with `allowed == false`. `Err` is reserved for an
/// invalid config and for backend failures under a fail-closed config.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Evaluate the limit for `key` and record the request if it is allowed.
    async fn check(&self, key: &str, config: &RateLimitConfig) -> Result<RateLimitResult>;

    /// Clear all state for one key.
    async fn reset(&self, key: &str) -> Result<()>;

    /// Clear all state for every key.
    async fn reset_all(&self) -> Result<()>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}

/// Limiters that can evaluate and record in separate phases.
///
/// `check_only` followed by `increment` is not atomic: concurrent callers can
/// both pass `check_only` before either records.
#[async_trait]
pub trait ExtendedRateLimiter: RateLimiter {
    /// Evaluate the limit for `key` without recording anything.
    async fn check_only(&self, key: &str, config: &RateLimitConfig) -> Result<RateLimitResult>;

    /// Record one request for `key` after the fact.
    async fn increment(&self, key: &str, config: &RateLimitConfig) -> Result<()>;
}
