//! In-process [`KvStore`] with lazy TTL expiry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{EntryMetadata, KvStore, SWEEP_INTERVAL};
use crate::error::BackendResult;
use crate::ratelimit::{Clock, SystemClock};

#[derive(Debug, Clone)]
struct StoredEntry {
    value: String,
    metadata: EntryMetadata,
    expires_at_ms: u64,
}

/// A [`KvStore`] held in process memory.
///
/// Useful for single-node deployments and as a test double for a remote KV
/// service. Expired entries are hidden on read, dropped when touched, and
/// swept from the whole map every [`SWEEP_INTERVAL`] writes.
#[derive(Debug)]
pub struct InMemoryKvStore {
    entries: DashMap<String, StoredEntry>,
    writes: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl InMemoryKvStore {
    /// Create an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store on the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            writes: AtomicU64::new(0),
            clock,
        }
    }

    /// Number of stored entries, including expired ones not yet dropped.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry.
    fn sweep_expired(&self) {
        let now = self.clock.now_ms();
        self.entries.retain(|_, entry| entry.expires_at_ms > now);
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get_with_metadata(
        &self,
        key: &str,
    ) -> BackendResult<Option<(String, EntryMetadata)>> {
        let now = self.clock.now_ms();
        let found = self
            .entries
            .get(key)
            .map(|entry| (entry.expires_at_ms > now, entry.value.clone(), entry.metadata));

        match found {
            Some((true, value, metadata)) => Ok(Some((value, metadata))),
            Some((false, _, _)) => {
                self.entries.remove_if(key, |_, entry| entry.expires_at_ms <= now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        key: &str,
        value: String,
        ttl_secs: u64,
        metadata: EntryMetadata,
    ) -> BackendResult<()> {
        let expires_at_ms = self
            .clock
            .now_ms()
            .saturating_add(ttl_secs.saturating_mul(1000));
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                value,
                metadata,
                expires_at_ms,
            },
        );

        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_INTERVAL == 0 {
            self.sweep_expired();
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> BackendResult<Vec<String>> {
        let now = self.clock.now_ms();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && entry.expires_at_ms > now)
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
