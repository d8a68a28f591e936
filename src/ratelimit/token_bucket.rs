//! Token bucket limiter with a background refill task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Semaphore, TryAcquireError};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::backend::Limiter;
use crate::context::Context;
use crate::error::{LimitError, Result};

/// Admits requests while tokens are available, refilling one token per
/// `refill_interval` up to `capacity`.
///
/// The bucket's tokens are semaphore permits. A full bucket drops the new
/// token, so the refill task never waits on callers. Checking never waits
/// either: an empty bucket fails immediately.
pub struct TokenBucketLimiter {
    tokens: Arc<Semaphore>,
    capacity: usize,
    refill_interval: Duration,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl TokenBucketLimiter {
    /// Create an empty bucket holding at most `capacity` tokens.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if `refill_interval` is zero.
    pub fn new(capacity: usize, refill_interval: Duration) -> Self {
        assert!(!refill_interval.is_zero(), "refill interval must be non-zero");
        let capacity = capacity.min(Semaphore::MAX_PERMITS);
        let tokens = Arc::new(Semaphore::new(0));
        let shutdown = CancellationToken::new();

        tokio::spawn(refill(
            tokens.clone(),
            capacity,
            refill_interval,
            shutdown.clone(),
        ));

        Self {
            tokens,
            capacity,
            refill_interval,
            shutdown,
            closed: AtomicBool::new(false),
        }
    }

    /// Tokens currently waiting in the bucket.
    pub fn available(&self) -> usize {
        self.tokens.available_permits()
    }

    /// Maximum tokens the bucket holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether [`Limiter::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

async fn refill(
    tokens: Arc<Semaphore>,
    capacity: usize,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                // Only this task adds permits, so the check cannot overshoot.
                if tokens.available_permits() < capacity {
                    tokens.add_permits(1);
                    trace!(available = tokens.available_permits(), "Token added");
                }
            }
        }
    }
    debug!("Token refill task stopped");
}

#[async_trait]
impl Limiter for TokenBucketLimiter {
    async fn allow(&self, ctx: &Context) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        match self.tokens.try_acquire() {
            Ok(permit) => {
                permit.forget();
                trace!(available = self.tokens.available_permits(), "Token consumed");
                Ok(())
            }
            // Closed between the shutdown check and here.
            Err(TryAcquireError::Closed) => Ok(()),
            Err(TryAcquireError::NoPermits) => {
                debug!(capacity = self.capacity, "Token bucket empty");
                Err(LimitError::ExceededLimit)
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        self.tokens.close();
        info!(
            capacity = self.capacity,
            refill_interval = ?self.refill_interval,
            "Token bucket limiter closed"
        );
    }
}

impl Drop for TokenBucketLimiter {
    fn drop(&mut self) {
        self.close();
    }
}
