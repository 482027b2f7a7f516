//! Ratewarden - Pluggable Rate Limiting
//!
//! This crate implements one rate limiting contract over three storage
//! backends: a process-local sliding window, a fixed window over an
//! eventually-consistent key-value store, and a fixed window over a store with
//! atomic increment-and-expire. Backend failures fail open by default.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;
