//! Storage drivers the fixed-window limiters run on.
//!
//! Two driver shapes are supported:
//!
//! - [`KvStore`]: an eventually-consistent key-value store with per-key TTL and
//!   entry metadata but no atomic read-modify-write.
//! - [`AtomicCounterStore`]: a store that can increment a counter and set its
//!   expiry in a single atomic round trip.

mod memory_counter;
mod memory_kv;
#[cfg(feature = "redis")]
mod redis;
#[cfg(test)]
pub(crate) mod testing;

pub use memory_counter::InMemoryCounterStore;
pub use memory_kv::InMemoryKvStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisCounterStore;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{BackendError, BackendResult};

/// Writes between full sweeps of expired entries in the in-process stores.
pub const SWEEP_INTERVAL: u64 = 100;

/// Metadata stored alongside a KV entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Monotonic version bumped on every write
    pub version: u64,
}

/// Eventually-consistent key-value store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value together with its metadata.
    async fn get_with_metadata(&self, key: &str) -> BackendResult<Option<(String, EntryMetadata)>>;

    /// Write a value that expires after `ttl_secs`.
    async fn put(
        &self,
        key: &str,
        value: String,
        ttl_secs: u64,
        metadata: EntryMetadata,
    ) -> BackendResult<()>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> BackendResult<()>;

    /// List every live key starting with `prefix`.
    async fn list(&self, prefix: &str) -> BackendResult<Vec<String>>;
}

/// Store with an atomic increment-and-expire primitive.
#[async_trait]
pub trait AtomicCounterStore: Send + Sync {
    /// Increment `key` and, only if it has no expiry yet, expire it after
    /// `ttl_secs`, as one atomic operation. Returns the new count.
    async fn incr_and_expire_nx(&self, key: &str, ttl_secs: u64) -> BackendResult<u64>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> BackendResult<()>;

    /// Delete every key starting with `prefix`, returning how many went.
    async fn delete_prefix(&self, prefix: &str) -> BackendResult<u64>;
}

/// Bound a driver call by `timeout`; an elapsed call is a backend error.
pub(crate) async fn with_timeout<T, F>(timeout: Duration, fut: F) -> BackendResult<T>
where
    F: Future<Output = BackendResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let value = with_timeout(Duration::from_secs(1), async { Ok::<_, BackendError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_with_timeout_maps_elapsed() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, BackendError>(())
        })
        .await;
        assert!(matches!(result, Err(BackendError::Timeout(_))));
    }
}
