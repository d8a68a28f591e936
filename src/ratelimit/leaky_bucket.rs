//! Ticker-paced leaky bucket limiter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::backend::Limiter;
use crate::context::Context;
use crate::error::Result;

/// Lets exactly one request through per `interval`.
///
/// Callers queue on a shared ticker and wait for their turn, their
/// context to end, or the limiter to close. Closing releases every waiter as
/// admitted rather than leaving it stuck.
pub struct LeakyBucketLimiter {
    ticker: Mutex<Interval>,
    interval: Duration,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl LeakyBucketLimiter {
    /// Create a limiter admitting one request per `interval`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero.
    pub fn new(interval: Duration) -> Self {
        assert!(!interval.is_zero(), "leak interval must be non-zero");
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            ticker: Mutex::new(ticker),
            interval,
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// The pacing interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether [`Limiter::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Limiter for LeakyBucketLimiter {
    async fn allow(&self, ctx: &Context) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                trace!("Leaky bucket closed, admitting");
                Ok(())
            }
            err = ctx.done() => {
                debug!(error = %err, "Leaky bucket wait abandoned");
                Err(err)
            }
            _ = async {
                let mut ticker = self.ticker.lock().await;
                ticker.tick().await;
            } => {
                trace!("Leaky bucket admitted");
                Ok(())
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        info!(interval = ?self.interval, "Leaky bucket limiter closed");
    }
}

impl Drop for LeakyBucketLimiter {
    fn drop(&mut self) {
        self.close();
    }
}
