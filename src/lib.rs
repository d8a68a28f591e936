//! Turnstile - Admission Control Library
//!
//! This crate decides, per unit of work, whether it may proceed now. It
//! provides four single-process algorithms (fixed window, sliding window,
//! leaky bucket, token bucket), two distributed limiters whose counters live
//! in a shared Redis store, and a decorator that layers per-client quotas over
//! any local limiter.

pub mod config;
pub mod context;
pub mod distributed;
pub mod error;
pub mod ratelimit;

pub use context::Context;
pub use distributed::DistributedLimiter;
pub use error::{LimitError, Result};
pub use ratelimit::Limiter;
