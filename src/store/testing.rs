//! Fault-injecting store doubles for unit tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{AtomicCounterStore, EntryMetadata, InMemoryKvStore, KvStore};
use crate::error::{BackendError, BackendResult};

fn unavailable() -> BackendError {
    BackendError::Store("connection refused".to_string())
}

/// KV store whose every call fails.
#[derive(Debug, Default)]
pub struct FailingKvStore;

#[async_trait]
impl KvStore for FailingKvStore {
    async fn get_with_metadata(
        &self,
        _key: &str,
    ) -> BackendResult<Option<(String, EntryMetadata)>> {
        Err(unavailable())
    }

    async fn put(&self, _: &str, _: String, _: u64, _: EntryMetadata) -> BackendResult<()> {
        Err(unavailable())
    }

    async fn delete(&self, _key: &str) -> BackendResult<()> {
        Err(unavailable())
    }

    async fn list(&self, _prefix: &str) -> BackendResult<Vec<String>> {
        Err(unavailable())
    }
}

/// Counter store whose every call fails.
#[derive(Debug, Default)]
pub struct FailingCounterStore;

#[async_trait]
impl AtomicCounterStore for FailingCounterStore {
    async fn incr_and_expire_nx(&self, _key: &str, _ttl_secs: u64) -> BackendResult<u64> {
        Err(unavailable())
    }

    async fn delete(&self, _key: &str) -> BackendResult<()> {
        Err(unavailable())
    }

    async fn delete_prefix(&self, _prefix: &str) -> BackendResult<u64> {
        Err(unavailable())
    }
}

/// KV store that silently drops the first `dropped` writes.
///
/// Reads after a dropped write observe the old value, which is what a
/// concurrent overwrite looks like to the writer.
#[derive(Debug, Default)]
pub struct LossyKvStore {
    pub inner: InMemoryKvStore,
    dropped: u32,
    pub puts: AtomicU32,
}

impl LossyKvStore {
    pub fn new(inner: InMemoryKvStore, dropped: u32) -> Self {
        Self {
            inner,
            dropped,
            puts: AtomicU32::new(0),
        }
    }

    pub fn put_count(&self) -> u32 {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KvStore for LossyKvStore {
    async fn get_with_metadata(&self, key: &str) -> BackendResult<Option<(String, EntryMetadata)>> {
        self.inner.get_with_metadata(key).await
    }

    async fn put(
        &self,
        key: &str,
        value: String,
        ttl_secs: u64,
        metadata: EntryMetadata,
    ) -> BackendResult<()> {
        let seen = self.puts.fetch_add(1, Ordering::SeqCst);
        if seen < self.dropped {
            return Ok(());
        }
        self.inner.put(key, value, ttl_secs, metadata).await
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> BackendResult<Vec<String>> {
        self.inner.list(prefix).await
    }
}

/// KV store whose reads never return.
#[derive(Debug, Default)]
pub struct HangingKvStore;

#[async_trait]
impl KvStore for HangingKvStore {
    async fn get_with_metadata(
        &self,
        _key: &str,
    ) -> BackendResult<Option<(String, EntryMetadata)>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(None)
    }

    async fn put(&self, _: &str, _: String, _: u64, _: EntryMetadata) -> BackendResult<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    async fn delete(&self, _key: &str) -> BackendResult<()> {
        Ok(())
    }

    async fn list(&self, _prefix: &str) -> BackendResult<Vec<String>> {
        Ok(Vec::new())
    }
}
