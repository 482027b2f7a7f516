//! Fixed-window rate limiter over a store with atomic increment-and-expire.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::backend::RateLimiter;
use super::clock::{Clock, SystemClock};
use super::keys::{self, DEFAULT_KEY_PREFIX};
use super::logger::{LimiterLogger, LogContext, TracingLogger};
use super::types::{RateLimitConfig, RateLimitResult};
use crate::error::{RateLimitError, Result};
use crate::store::{with_timeout, AtomicCounterStore};

/// Default bound on a single store call.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Strict fixed-window limiter.
///
/// Every check is one atomic INCR + EXPIRE NX pipeline, so the expiry is set
/// exactly once by the request that creates the key and concurrent callers are
/// serialized by the store. The window is the key's TTL; there is no
/// check-only variant.
pub struct AtomicStoreLimiter {
    store: Arc<dyn AtomicCounterStore>,
    prefix: String,
    timeout: Duration,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn LimiterLogger>,
}

impl AtomicStoreLimiter {
    /// Create a new limiter over `store` with default settings.
    pub fn new(store: Arc<dyn AtomicCounterStore>) -> Self {
        Self {
            store,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            timeout: DEFAULT_TIMEOUT,
            clock: Arc::new(SystemClock),
            logger: Arc::new(TracingLogger),
        }
    }

    /// Set the storage key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the per-call backend timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the logger collaborator.
    pub fn with_logger(mut self, logger: Arc<dyn LimiterLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Storage key for `key`.
    pub fn storage_key(&self, key: &str) -> String {
        keys::counter_key(&self.prefix, key)
    }
}

#[async_trait]
impl RateLimiter for AtomicStoreLimiter {
    async fn check(&self, key: &str, config: &RateLimitConfig) -> Result<RateLimitResult> {
        config.validate()?;
        let now = self.clock.now_ms();
        let limit = config.effective_limit();
        let ttl_secs = keys::ttl_seconds(config.window_ms);
        let storage_key = self.storage_key(key);

        trace!(key = %key, ttl_secs = ttl_secs, "Checking atomic rate limit");

        let count = match with_timeout(
            self.timeout,
            self.store.incr_and_expire_nx(&storage_key, ttl_secs),
        )
        .await
        {
            Ok(count) => count,
            Err(e) if config.fail_open => {
                self.logger.warn(
                    "Rate limiter backend failed, allowing request",
                    &LogContext::new(key, "check").with_error(&e),
                );
                return Ok(RateLimitResult::fail_open(config, now));
            }
            Err(e) => return Err(RateLimitError::backend("check", e)),
        };

        let reset_at = now.saturating_add(ttl_secs.saturating_mul(1000));
        if count <= limit {
            Ok(RateLimitResult::allowed(limit, limit - count, reset_at))
        } else {
            debug!(key = %key, count = count, limit = limit, "Rate limit exceeded");
            Ok(RateLimitResult::denied(limit, reset_at, now))
        }
    }

    async fn reset(&self, key: &str) -> Result<()> {
        let storage_key = self.storage_key(key);
        with_timeout(self.timeout, self.store.delete(&storage_key))
            .await
            .map_err(|e| RateLimitError::backend("reset", e))
    }

    async fn reset_all(&self) -> Result<()> {
        let deleted = with_timeout(self.timeout, self.store.delete_prefix(&self.prefix))
            .await
            .map_err(|e| RateLimitError::backend("reset_all", e))?;
        debug!(prefix = %self.prefix, deleted = deleted, "Deleted rate limit counters");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "atomic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::ratelimit::logger::testing::RecordingLogger;
    use crate::ratelimit::ManualClock;
    use crate::store::testing::FailingCounterStore;
    use crate::store::InMemoryCounterStore;

    fn limiter_at(
        start_ms: u64,
    ) -> (AtomicStoreLimiter, Arc<InMemoryCounterStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start_ms));
        let store = Arc::new(InMemoryCounterStore::with_clock(clock.clone()));
        let limiter = AtomicStoreLimiter::new(store.clone()).with_clock(clock.clone());
        (limiter, store, clock)
    }

    #[tokio::test]
    async fn test_remaining_counts_down_then_denies() {
        let (limiter, _store, _clock) = limiter_at(0);
        let config = RateLimitConfig::new(5, 60_000);

        for expected in [4, 3, 2, 1, 0] {
            let result = limiter.check("u1", &config).await.unwrap();
            assert!(result.allowed);
            assert_eq!(result.remaining, expected);
            assert_eq!(result.reset_at_ms, 60_000);
        }

        let result = limiter.check("u1", &config).await.unwrap();
        assert!(!result.allowed);
        assert_eq!(result.remaining, 0);
        assert_eq!(result.retry_after_secs, Some(60));
    }

    #[tokio::test]
    async fn test_ttl_set_once_by_first_request() {
        let (limiter, store, clock) = limiter_at(0);
        let config = RateLimitConfig::new(2, 10_000);

        limiter.check("k", &config).await.unwrap();
        clock.advance(9_000);
        limiter.check("k", &config).await.unwrap();
        assert!(!limiter.check("k", &config).await.unwrap().allowed);
        assert_eq!(store.get("ratelimit:k"), Some(3));

        // The window opened at t=0, not at the later requests.
        clock.advance(1_000);
        let result = limiter.check("k", &config).await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining, 1);
    }

    #[tokio::test]
    async fn test_window_rounds_up_to_seconds() {
        let (limiter, _store, _clock) = limiter_at(0);
        let result = limiter.check("k", &RateLimitConfig::new(1, 1_500)).await.unwrap();
        assert_eq!(result.reset_at_ms, 2_000);
    }

    #[tokio::test]
    async fn test_fail_open_and_closed() {
        let logger = Arc::new(RecordingLogger::default());
        let limiter =
            AtomicStoreLimiter::new(Arc::new(FailingCounterStore)).with_logger(logger.clone());

        let result = limiter.check("u1", &RateLimitConfig::new(5, 60_000)).await.unwrap();
        assert!(result.allowed);
        assert!(result.backend_error);
        assert_eq!(result.remaining, 5);
        assert_eq!(logger.warnings.lock().len(), 1);

        let config = RateLimitConfig::new(5, 60_000).with_fail_open(false);
        let err = limiter.check("u1", &config).await.unwrap_err();
        assert!(matches!(
            err,
            RateLimitError::BackendUnavailable {
                operation: "check",
                source: BackendError::Store(_)
            }
        ));
    }

    #[tokio::test]
    async fn test_reset_and_reset_all() {
        let (limiter, store, _clock) = limiter_at(0);
        let config = RateLimitConfig::new(1, 60_000);

        limiter.check("u1", &config).await.unwrap();
        limiter.check("u2", &config).await.unwrap();

        limiter.reset("u1").await.unwrap();
        assert!(limiter.check("u1", &config).await.unwrap().allowed);
        assert!(!limiter.check("u2", &config).await.unwrap().allowed);

        limiter.reset_all().await.unwrap();
        assert_eq!(store.get("ratelimit:u1"), None);
        assert_eq!(store.get("ratelimit:u2"), None);
    }

    #[tokio::test]
    async fn test_concurrent_checks_are_strict() {
        let (limiter, _store, _clock) = limiter_at(0);
        let limiter = Arc::new(limiter);
        let config = RateLimitConfig::new(10, 60_000).with_burst(5);

        let tasks: Vec<_> = (0..100)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.check("shared", &config).await.unwrap().allowed })
            })
            .collect();

        let allowed = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|allowed| *allowed.as_ref().unwrap())
            .count();
        assert_eq!(allowed, 15);
    }
}
