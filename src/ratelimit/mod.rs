//! Rate limiting logic and state management.

mod atomic;
mod backend;
mod clock;
mod eventual;
mod factory;
mod headers;
mod keys;
pub(crate) mod logger;
mod memory;
mod types;

pub use atomic::AtomicStoreLimiter;
pub use backend::{ExtendedRateLimiter, RateLimiter};
pub use clock::{Clock, ManualClock, SystemClock};
pub use eventual::{EventualStoreLimiter, IncrementOutcome};
pub use factory::build_limiter;
pub use headers::{
    rate_limit_headers, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET, HEADER_RETRY_AFTER,
};
pub use keys::{
    counter_key, ttl_seconds, window_end_ms, window_epoch, WindowKey, DEFAULT_KEY_PREFIX,
};
pub use logger::{LimiterLogger, LogContext, TracingLogger};
pub use memory::MemoryLimiter;
pub use types::{RateLimitConfig, RateLimitResult};
