//! In-process [`AtomicCounterStore`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{AtomicCounterStore, SWEEP_INTERVAL};
use crate::error::BackendResult;
use crate::ratelimit::{Clock, SystemClock};

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    expires_at_ms: Option<u64>,
}

/// An [`AtomicCounterStore`] held in process memory.
///
/// Increment and expiry run under the map's per-shard write lock, which gives
/// the same single-step semantics as a transactional INCR + EXPIRE NX.
/// Expired counters are swept every [`SWEEP_INTERVAL`] increments.
#[derive(Debug)]
pub struct InMemoryCounterStore {
    counters: DashMap<String, Counter>,
    writes: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl InMemoryCounterStore {
    /// Create an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store on the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: DashMap::new(),
            writes: AtomicU64::new(0),
            clock,
        }
    }

    /// Current live count for `key`, if any.
    pub fn get(&self, key: &str) -> Option<u64> {
        let now = self.clock.now_ms();
        self.counters
            .get(key)
            .filter(|counter| counter.expires_at_ms.map_or(true, |at| at > now))
            .map(|counter| counter.count)
    }

    /// Number of stored counters, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether the store holds no counters.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Drop every expired counter.
    fn sweep_expired(&self) {
        let now = self.clock.now_ms();
        self.counters
            .retain(|_, counter| counter.expires_at_ms.map_or(true, |at| at > now));
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AtomicCounterStore for InMemoryCounterStore {
    async fn incr_and_expire_nx(&self, key: &str, ttl_secs: u64) -> BackendResult<u64> {
        let now = self.clock.now_ms();
        let count = {
            let mut counter = self.counters.entry(key.to_string()).or_insert(Counter {
                count: 0,
                expires_at_ms: None,
            });

            if counter.expires_at_ms.is_some_and(|at| at <= now) {
                counter.count = 0;
                counter.expires_at_ms = None;
            }

            counter.count += 1;
            if counter.expires_at_ms.is_none() {
                counter.expires_at_ms = Some(now.saturating_add(ttl_secs.saturating_mul(1000)));
            }
            counter.count
        };

        // The shard guard above must be released before sweeping.
        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_INTERVAL == 0 {
            self.sweep_expired();
        }
        Ok(count)
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        self.counters.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> BackendResult<u64> {
        let before = self.counters.len();
        self.counters.retain(|key, _| !key.starts_with(prefix));
        Ok((before - self.counters.len()) as u64)
    }
}
