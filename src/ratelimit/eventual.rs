//! Fixed-window rate limiter over an eventually-consistent key-value store.
//!
//! The store offers get/put/delete/list with per-key TTL but no atomic
//! increment, so recording a request is a read-modify-write guarded by a
//! version number and a read-back check.
//!
//! # Consistency
//!
//! `check_only` and `increment` are two separate round trips with no
//! compare-and-swap in between. Concurrent callers for the same key can both
//! observe "allowed" before either writes, so under high concurrency the true
//! count can briefly exceed the effective limit. The read-back verification
//! catches some lost updates, not all of them. Use
//! [`AtomicStoreLimiter`](super::AtomicStoreLimiter) when strict enforcement is
//! required.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::backend::{ExtendedRateLimiter, RateLimiter};
use super::clock::{Clock, SystemClock};
use super::keys::{self, WindowKey, DEFAULT_KEY_PREFIX};
use super::logger::{LimiterLogger, LogContext, TracingLogger};
use super::types::{RateLimitConfig, RateLimitResult};
use crate::config::EventualOptions;
use crate::error::{BackendError, BackendResult, RateLimitError, Result};
use crate::store::{with_timeout, EntryMetadata, KvStore};

/// Default bound on a single store call.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Value stored for one key in one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct WindowEntry {
    count: u64,
    window: u64,
}

/// Result of recording one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementOutcome {
    /// The write was read back successfully
    Committed {
        /// Attempts used, starting at 1
        attempts: u32,
    },
    /// Every attempt failed verification or errored
    Exhausted {
        /// Attempts made
        attempts: u32,
    },
}

/// Fixed-window limiter with optimistic concurrency over a [`KvStore`].
pub struct EventualStoreLimiter {
    store: Arc<dyn KvStore>,
    options: EventualOptions,
    prefix: String,
    timeout: Duration,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn LimiterLogger>,
}

impl EventualStoreLimiter {
    /// Create a new limiter over `store` with default settings.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            options: EventualOptions::default(),
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            timeout: DEFAULT_TIMEOUT,
            clock: Arc::new(SystemClock),
            logger: Arc::new(TracingLogger),
        }
    }

    /// Set retry and TTL options.
    pub fn with_options(mut self, options: EventualOptions) -> Self {
        self.options = options;
        self
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

    /// Storage key for `key` in window `window`.
    pub fn storage_key(&self, key: &str, window: u64) -> String {
        WindowKey::new(key, window).to_storage_key(&self.prefix)
    }

    /// TTL for entries of a window of `window_ms`.
    fn entry_ttl_secs(&self, window_ms: u64) -> u64 {
        keys::ttl_seconds(window_ms).saturating_add(self.options.ttl_buffer_secs)
    }

    async fn read_entry(
        &self,
        storage_key: &str,
    ) -> BackendResult<Option<(WindowEntry, EntryMetadata)>> {
        let found =
            with_timeout(self.timeout, self.store.get_with_metadata(storage_key)).await?;
        match found {
            Some((value, metadata)) => {
                let entry: WindowEntry = serde_json::from_str(&value)?;
                Ok(Some((entry, metadata)))
            }
            None => Ok(None),
        }
    }

    async fn evaluate(
        &self,
        key: &str,
        config: &RateLimitConfig,
        now: u64,
    ) -> BackendResult<RateLimitResult> {
        let limit = config.effective_limit();
        let window = keys::window_epoch(now, config.window_ms);
        let reset_at = keys::window_end_ms(window, config.window_ms);
        let storage_key = self.storage_key(key, window);

        let count = match self.read_entry(&storage_key).await? {
            Some((entry, _)) if entry.window == window => entry.count,
            _ => 0,
        };

        trace!(
            key = %key,
            window = window,
            count = count,
            limit = limit,
            "Evaluated window entry"
        );

        if count < limit {
            Ok(RateLimitResult::allowed(limit, limit - count - 1, reset_at))
        } else {
            debug!(key = %key, count = count, limit = limit, "Rate limit exceeded");
            Ok(RateLimitResult::denied(limit, reset_at, now))
        }
    }

    /// Read the entry back and confirm it holds at least `expected` in `window`.
    pub(crate) async fn verify_write(
        &self,
        storage_key: &str,
        window: u64,
        expected: u64,
    ) -> BackendResult<bool> {
        let observed = self.read_entry(storage_key).await?;
        Ok(matches!(
            observed,
            Some((entry, _)) if entry.window == window && entry.count >= expected
        ))
    }

    /// One read-modify-write-verify pass.
    async fn try_increment(&self, key: &str, config: &RateLimitConfig) -> BackendResult<bool> {
        let now = self.clock.now_ms();
        let window = keys::window_epoch(now, config.window_ms);
        let storage_key = self.storage_key(key, window);

        let (count, version) = match self.read_entry(&storage_key).await? {
            Some((entry, metadata)) if entry.window == window => {
                (entry.count + 1, metadata.version + 1)
            }
            Some((_, metadata)) => (1, metadata.version + 1),
            None => (1, 1),
        };

        let value = serde_json::to_string(&WindowEntry { count, window })?;
        with_timeout(
            self.timeout,
            self.store.put(
                &storage_key,
                value,
                self.entry_ttl_secs(config.window_ms),
                EntryMetadata { version },
            ),
        )
        .await?;

        self.verify_write(&storage_key, window, count).await
    }

    /// Record one request, retrying with linear backoff on failed verification.
    pub async fn increment_with_retry(
        &self,
        key: &str,
        config: &RateLimitConfig,
    ) -> IncrementOutcome {
        let max_attempts = self.options.max_retries.max(1);

        for attempt in 1..=max_attempts {
            match self.try_increment(key, config).await {
                Ok(true) => return IncrementOutcome::Committed { attempts: attempt },
                Ok(false) => {
                    debug!(key = %key, attempt = attempt, "Increment verification failed");
                }
                Err(e) => {
                    debug!(
                        key = %key,
                        attempt = attempt,
                        error = %e,
                        "Increment attempt errored"
                    );
                }
            }

            if attempt < max_attempts {
                let backoff = self.options.retry_backoff_ms.saturating_mul(u64::from(attempt));
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
        }

        let err = RateLimitError::RetriesExhausted { attempts: max_attempts };
        self.logger.error(
            "Rate limit increment gave up; request was already allowed",
            &err,
            &LogContext::new(key, "increment").with_attempts(max_attempts),
        );
        IncrementOutcome::Exhausted { attempts: max_attempts }
    }

    fn on_backend_error(
        &self,
        key: &str,
        operation: &'static str,
        config: &RateLimitConfig,
        now: u64,
        err: BackendError,
    ) -> Result<RateLimitResult> {
        if config.fail_open {
            self.logger.warn(
                "Rate limiter backend failed, allowing request",
                &LogContext::new(key, operation).with_error(&err),
            );
            Ok(RateLimitResult::fail_open(config, now))
        } else {
            Err(RateLimitError::backend(operation, err))
        }
    }

    /// Delete entries under `prefix`, limited to `caller_key` when given.
    ///
    /// Listing by prefix alone is not enough for a single caller: the prefix
    /// for `u1` also matches every window of a caller named `u1|admin`.
    async fn delete_matching(
        &self,
        prefix: &str,
        caller_key: Option<&str>,
        operation: &'static str,
    ) -> Result<()> {
        let mut listed = with_timeout(self.timeout, self.store.list(prefix))
            .await
            .map_err(|e| RateLimitError::backend(operation, e))?;

        if let Some(caller_key) = caller_key {
            listed.retain(|storage_key| {
                WindowKey::from_storage_key(&self.prefix, storage_key)
                    .is_some_and(|parsed| parsed.caller_key == caller_key)
            });
        }

        for storage_key in &listed {
            with_timeout(self.timeout, self.store.delete(storage_key))
                .await
                .map_err(|e| RateLimitError::backend(operation, e))?;
        }

        debug!(prefix = %prefix, deleted = listed.len(), "Deleted rate limit entries");
        Ok(())
    }
}

#[async_trait]
impl RateLimiter for EventualStoreLimiter {
    async fn check(&self, key: &str, config: &RateLimitConfig) -> Result<RateLimitResult> {
        config.validate()?;
        let now = self.clock.now_ms();

        let result = match self.evaluate(key, config, now).await {
            Ok(result) => result,
            Err(e) => return self.on_backend_error(key, "check", config, now, e),
        };

        if result.allowed {
            self.increment_with_retry(key, config).await;
        }
        Ok(result)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        let prefix = WindowKey::caller_prefix(&self.prefix, key);
        self.delete_matching(&prefix, Some(key), "reset").await
    }

    async fn reset_all(&self) -> Result<()> {
        let prefix = self.prefix.clone();
        self.delete_matching(&prefix, None, "reset_all").await
    }

    fn backend_name(&self) -> &'static str {
        "eventual"
    }
}

#[async_trait]
impl ExtendedRateLimiter for EventualStoreLimiter {
    async fn check_only(&self, key: &str, config: &RateLimitConfig) -> Result<RateLimitResult> {
        config.validate()?;
        let now = self.clock.now_ms();

        match self.evaluate(key, config, now).await {
            Ok(result) => Ok(result),
            Err(e) => self.on_backend_error(key, "check_only", config, now, e),
        }
    }

    async fn increment(&self, key: &str, config: &RateLimitConfig) -> Result<()> {
        config.validate()?;
        self.increment_with_retry(key, config).await;
        Ok(())
    }
}
