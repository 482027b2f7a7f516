//! Process-local sliding-window rate limiter.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::backend::RateLimiter;
use super::clock::{Clock, SystemClock};
use super::types::{RateLimitConfig, RateLimitResult};
use crate::config::MemoryOptions;
use crate::error::Result;

/// Fraction of `max_entries` the map is trimmed down to on eviction.
const EVICTION_TARGET_RATIO: f64 = 0.8;

/// Request log for one caller key.
#[derive(Debug, Default)]
struct KeyLog {
    /// Request timestamps in arrival order
    timestamps: VecDeque<u64>,
    /// Window the key was last checked with, used by cleanup
    window_ms: u64,
    /// Value of the touch sequence when the key was last checked
    last_touch: u64,
}

impl KeyLog {
    /// Drop timestamps at or before `now - window_ms`.
    fn prune(&mut self, now: u64, window_ms: u64) {
        while let Some(&oldest) = self.timestamps.front() {
            if oldest.saturating_add(window_ms) <= now {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    logs: HashMap<String, KeyLog>,
    /// Checks since the last cleanup sweep
    requests_since_cleanup: u64,
    /// Monotonic counter ordering key activity for LRU eviction
    touch_seq: u64,
}

impl MemoryState {
    /// Purge timestamps older than twice each key's window; drop empty keys.
    fn cleanup(&mut self, now: u64) {
        let before = self.logs.len();
        self.logs.retain(|_, log| {
            log.prune(now, log.window_ms.saturating_mul(2));
            !log.timestamps.is_empty()
        });
        trace!(
            removed = before - self.logs.len(),
            remaining = self.logs.len(),
            "Memory limiter cleanup"
        );
    }

    /// Evict least recently touched keys down to the target size.
    ///
    /// The target never drops below one, so the most recently touched key
    /// (the one the current check just recorded) always survives.
    fn evict_lru(&mut self, max_entries: usize) {
        let target = ((max_entries as f64 * EVICTION_TARGET_RATIO).floor() as usize).max(1);
        if self.logs.len() <= target {
            return;
        }

        let mut by_activity: Vec<(u64, String)> = self
            .logs
            .iter()
            .map(|(key, log)| (log.last_touch, key.clone()))
            .collect();
        by_activity.sort_unstable_by_key(|(touch, _)| *touch);

        let excess = self.logs.len() - target;
        for (_, key) in by_activity.into_iter().take(excess) {
            self.logs.remove(&key);
        }

        debug!(
            evicted = excess,
            remaining = self.logs.len(),
            max_entries = max_entries,
            "Evicted least recently used rate limit keys"
        );
    }
}

/// Sliding-window limiter keyed by an in-process map.
///
/// The map is bounded two ways: every `cleanup_interval` checks, stale
/// timestamps are purged across all keys, and whenever the map holds more than
/// `max_entries` keys the least recently touched ones are evicted.
///
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct MemoryLimiter {
    state: Mutex<MemoryState>,
    options: MemoryOptions,
    clock: Arc<dyn Clock>,
}

impl MemoryLimiter {
    /// Create a new limiter with default options.
    pub fn new() -> Self {
        Self::with_options(MemoryOptions::default())
    }

    /// Create a new limiter with the given options on the system clock.
    pub fn with_options(options: MemoryOptions) -> Self {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    /// Create a new limiter on an explicit clock.
    pub fn with_clock(options: MemoryOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            options,
            clock,
        }
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.state.lock().logs.len()
    }

    /// Number of recorded timestamps for `key`, without pruning.
    pub fn recorded(&self, key: &str) -> Option<usize> {
        self.state.lock().logs.get(key).map(|log| log.timestamps.len())
    }

    fn check_now(&self, key: &str, config: &RateLimitConfig) -> RateLimitResult {
        let now = self.clock.now_ms();
        let limit = config.effective_limit();
        let mut state = self.state.lock();

        state.requests_since_cleanup += 1;
        if state.requests_since_cleanup >= self.options.cleanup_interval.max(1) {
            state.requests_since_cleanup = 0;
            state.cleanup(now);
            if state.logs.len() > self.options.max_entries {
                state.evict_lru(self.options.max_entries);
            }
        }

        state.touch_seq += 1;
        let touch = state.touch_seq;

        let log = state.logs.entry(key.to_string()).or_default();
        log.window_ms = config.window_ms;
        log.last_touch = touch;
        log.prune(now, config.window_ms);

        let count = log.timestamps.len() as u64;
        let result = if count < limit {
            log.timestamps.push_back(now);
            let reset_at = log
                .timestamps
                .front()
                .map_or(now, |&oldest| oldest)
                .saturating_add(config.window_ms);
            RateLimitResult::allowed(limit, limit - (count + 1), reset_at)
        } else {
            let reset_at = log
                .timestamps
                .front()
                .map_or(now, |&oldest| oldest)
                .saturating_add(config.window_ms);
            debug!(key = %key, count = count, limit = limit, "Rate limit exceeded");
            RateLimitResult::denied(limit, reset_at, now)
        };

        if state.logs.len() > self.options.max_entries {
            state.evict_lru(self.options.max_entries);
        }

        result
    }
}

impl Default for MemoryLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimiter for MemoryLimiter {
    async fn check(&self, key: &str, config: &RateLimitConfig) -> Result<RateLimitResult> {
        config.validate()?;
        trace!(key = %key, "Checking memory rate limit");
        Ok(self.check_now(key, config))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.state.lock().logs.remove(key);
        Ok(())
    }

    async fn reset_all(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.logs.clear();
        state.requests_since_cleanup = 0;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
