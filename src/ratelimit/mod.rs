//! Single-process admission algorithms and the per-client decorator.

mod backend;
mod clock;
mod fixed_window;
mod keyed;
mod leaky_bucket;
mod sliding_window;
mod token_bucket;

pub use backend::Limiter;
pub use fixed_window::FixedWindowLimiter;
pub use keyed::KeyedLimiter;
pub use leaky_bucket::LeakyBucketLimiter;
pub use sliding_window::SlidingWindowLimiter;
pub use token_bucket::TokenBucketLimiter;
