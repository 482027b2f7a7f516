//! Configuration management for Ratewarden.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RateLimitError, Result};
use crate::ratelimit::{RateLimitConfig, DEFAULT_KEY_PREFIX};

/// Prefix for environment variable overrides, e.g. `RATEWARDEN__BACKEND=atomic`.
pub const ENV_PREFIX: &str = "RATEWARDEN";

/// Main configuration for a Ratewarden limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Which backend to build
    #[serde(default)]
    pub backend: BackendKind,

    /// Prefix applied to every storage key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Upper bound on any single backend call, in milliseconds
    #[serde(default = "default_backend_timeout_ms")]
    pub backend_timeout_ms: u64,

    /// Limit used when the caller does not supply one
    #[serde(default)]
    pub default_limit: RateLimitConfig,

    /// In-memory backend options
    #[serde(default)]
    pub memory: MemoryOptions,

    /// Eventually-consistent backend options
    #[serde(default)]
    pub eventual: EventualOptions,

    /// Atomic backend options
    #[serde(default)]
    pub atomic: AtomicOptions,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            key_prefix: default_key_prefix(),
            backend_timeout_ms: default_backend_timeout_ms(),
            default_limit: RateLimitConfig::default(),
            memory: MemoryOptions::default(),
            eventual: EventualOptions::default(),
            atomic: AtomicOptions::default(),
        }
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process-local sliding window
    #[default]
    Memory,
    /// Eventually-consistent KV store, fixed window
    Eventual,
    /// Atomic counter store, fixed window
    Atomic,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackendKind::Memory => "memory",
            BackendKind::Eventual => "eventual",
            BackendKind::Atomic => "atomic",
        };
        f.write_str(name)
    }
}

/// Options for the in-memory backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryOptions {
    /// Run a stale-entry sweep every this many checks
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,

    /// Maximum number of tracked keys before LRU eviction
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            cleanup_interval: default_cleanup_interval(),
            max_entries: default_max_entries(),
        }
    }
}

/// Options for the eventually-consistent backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventualOptions {
    /// Total increment attempts before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Linear backoff step between attempts, in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Seconds added to entry TTLs to absorb clock and propagation skew
    #[serde(default = "default_ttl_buffer_secs")]
    pub ttl_buffer_secs: u64,
}

impl Default for EventualOptions {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            ttl_buffer_secs: default_ttl_buffer_secs(),
        }
    }
}

/// Options for the atomic backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicOptions {
    /// Redis URL; the in-process counter store is used when unset
    #[serde(default)]
    pub redis_url: Option<String>,
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_backend_timeout_ms() -> u64 {
    5000
}

fn default_cleanup_interval() -> u64 {
    100
}

fn default_max_entries() -> usize {
    10000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    10
}

fn default_ttl_buffer_secs() -> u64 {
    60
}

impl WardenConfig {
    /// Load configuration from a file, then apply `RATEWARDEN__*` overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .map_err(|e| RateLimitError::Config(e.to_string()))?;

        let config: WardenConfig = settings
            .try_deserialize()
            .map_err(|e| RateLimitError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: WardenConfig = serde_yaml::from_str(yaml)
            .map_err(|e| RateLimitError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would make a limiter misbehave.
    pub fn validate(&self) -> Result<()> {
        self.default_limit.validate()?;
        if self.backend_timeout_ms == 0 {
            return Err(RateLimitError::Config(
                "backend_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.memory.max_entries == 0 {
            return Err(RateLimitError::Config(
                "memory.max_entries must be greater than zero".to_string(),
            ));
        }
        if self.eventual.max_retries == 0 {
            return Err(RateLimitError::Config(
                "eventual.max_retries must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Backend call timeout as a duration.
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    /// Whether limiter state outlives the process.
    ///
    /// Only the atomic backend over Redis keeps counters outside this
    /// process; every other backend starts empty on each run.
    pub fn has_shared_state(&self) -> bool {
        self.backend == BackendKind::Atomic && self.atomic.redis_url.is_some()
    }
}
