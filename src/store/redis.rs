//! Redis-backed [`AtomicCounterStore`].

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::info;

use super::AtomicCounterStore;
use crate::error::BackendResult;

/// Counter store on a Redis connection manager.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection_manager: ConnectionManager,
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore").finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str) -> BackendResult<Self> {
        info!(url = %url, "Connecting to Redis counter store");
        let client = Client::open(url)?;
        let connection_manager = client.get_connection_manager().await?;
        Ok(Self { connection_manager })
    }

    /// Wrap an existing connection manager.
    pub fn from_connection_manager(connection_manager: ConnectionManager) -> Self {
        Self { connection_manager }
    }
}

#[async_trait]
impl AtomicCounterStore for RedisCounterStore {
    async fn incr_and_expire_nx(&self, key: &str, ttl_secs: u64) -> BackendResult<u64> {
        let mut connection_manager = self.connection_manager.clone();

        // MULTI/EXEC: INCR first so EXPIRE NX only ever lands on the creating
        // request, leaving later increments inside the original window.
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .arg("NX")
            .ignore()
            .query_async(&mut connection_manager)
            .await?;

        Ok(count)
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        let mut connection_manager = self.connection_manager.clone();
        let _: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut connection_manager)
            .await?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> BackendResult<u64> {
        let mut connection_manager = self.connection_manager.clone();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(format!("{}*", prefix))
            .query_async(&mut connection_manager)
            .await?;

        if keys.is_empty() {
            return Ok(0);
        }

        let deleted: u64 = redis::cmd("DEL")
            .arg(&keys)
            .query_async(&mut connection_manager)
            .await?;
        Ok(deleted)
    }
}
