//! Build the configured limiter once at startup.

use std::sync::Arc;

use tracing::info;

use super::atomic::AtomicStoreLimiter;
use super::backend::RateLimiter;
use super::eventual::EventualStoreLimiter;
use super::memory::MemoryLimiter;
use crate::config::{BackendKind, WardenConfig};
use crate::error::{RateLimitError, Result};
use crate::store::{AtomicCounterStore, InMemoryCounterStore, InMemoryKvStore};

/// Construct the limiter selected by `config`.
///
/// The returned value is meant to be created once and shared with every call
/// site. The eventual backend is built over the bundled in-process KV store;
/// embedders with a remote KV service construct [`EventualStoreLimiter`]
/// directly.
pub async fn build_limiter(config: &WardenConfig) -> Result<Arc<dyn RateLimiter>> {
    config.validate()?;

    let limiter: Arc<dyn RateLimiter> = match config.backend {
        BackendKind::Memory => Arc::new(MemoryLimiter::with_options(config.memory)),
        BackendKind::Eventual => Arc::new(
            EventualStoreLimiter::new(Arc::new(InMemoryKvStore::new()))
                .with_options(config.eventual)
                .with_prefix(config.key_prefix.clone())
                .with_timeout(config.backend_timeout()),
        ),
        BackendKind::Atomic => Arc::new(
            AtomicStoreLimiter::new(counter_store(config).await?)
                .with_prefix(config.key_prefix.clone())
                .with_timeout(config.backend_timeout()),
        ),
    };

    info!(
        backend = limiter.backend_name(),
        key_prefix = %config.key_prefix,
        "Rate limiter initialized"
    );
    Ok(limiter)
}

#[cfg(feature = "redis")]
async fn counter_store(config: &WardenConfig) -> Result<Arc<dyn AtomicCounterStore>> {
    match &config.atomic.redis_url {
        Some(url) => {
            let store = crate::store::RedisCounterStore::connect(url)
                .await
                .map_err(|e| RateLimitError::backend("connect", e))?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(InMemoryCounterStore::new())),
    }
}

#[cfg(not(feature = "redis"))]
async fn counter_store(config: &WardenConfig) -> Result<Arc<dyn AtomicCounterStore>> {
    if config.atomic.redis_url.is_some() {
        return Err(RateLimitError::Config(
            "atomic.redis_url requires the `redis` feature".to_string(),
        ));
    }
    Ok(Arc::new(InMemoryCounterStore::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::RateLimitConfig;

    #[tokio::test]
    async fn test_builds_each_backend() {
        for (kind, name) in [
            (BackendKind::Memory, "memory"),
            (BackendKind::Eventual, "eventual"),
            (BackendKind::Atomic, "atomic"),
        ] {
            let config = WardenConfig {
                backend: kind,
                ..WardenConfig::default()
            };
            let limiter = build_limiter(&config).await.unwrap();
            assert_eq!(limiter.backend_name(), name);

            let result = limiter.check("u1", &RateLimitConfig::new(1, 60_000)).await.unwrap();
            assert!(result.allowed);
        }
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let mut config = WardenConfig::default();
        config.eventual.max_retries = 0;
        assert!(build_limiter(&config).await.is_err());
    }

    #[cfg(not(feature = "redis"))]
    #[tokio::test]
    async fn test_redis_url_without_feature() {
        let mut config = WardenConfig {
            backend: BackendKind::Atomic,
            ..WardenConfig::default()
        };
        config.atomic.redis_url = Some("redis://127.0.0.1:6379".to_string());
        assert!(matches!(
            build_limiter(&config).await,
            Err(RateLimitError::Config(_))
        ));
    }
}
