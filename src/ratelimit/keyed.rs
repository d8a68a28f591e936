//! Per-client quotas layered over any local limiter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::backend::Limiter;
use crate::context::Context;
use crate::distributed::DistributedLimiter;
use crate::error::{LimitError, Result};

/// Admissions per client key within the current epoch.
type KeyCounts = Arc<RwLock<HashMap<String, u64>>>;

/// Partitions a limiter by client key (an IP address, an API key, ...).
///
/// Each key may be admitted at most `max_per_key` times per epoch, on top of
/// whatever the wrapped limiter allows overall. All counts are dropped at
/// every epoch boundary.
///
/// No lock is held across the wrapped limiter. Concurrent callers racing for
/// a key's last slot may each consume an inner admission, but only those
/// that win the final increment are admitted.
pub struct KeyedLimiter<L> {
    inner: L,
    counts: KeyCounts,
    max_per_key: u64,
    reset_interval: Duration,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl<L: Limiter> KeyedLimiter<L> {
    /// Wrap `inner`, allowing each key `max_per_key` admissions per `reset_interval`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if `reset_interval` is zero.
    pub fn new(inner: L, reset_interval: Duration, max_per_key: u64) -> Self {
        assert!(!reset_interval.is_zero(), "reset interval must be non-zero");
        let counts: KeyCounts = Arc::new(RwLock::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        tokio::spawn(reset_epochs(
            counts.clone(),
            reset_interval,
            shutdown.clone(),
        ));

        Self {
            inner,
            counts,
            max_per_key,
            reset_interval,
            shutdown,
            closed: AtomicBool::new(false),
        }
    }

    /// Decide whether a request from `key` may proceed now.
    pub async fn allow_for(&self, ctx: &Context, key: &str) -> Result<()> {
        if self.quota_spent(key) {
            debug!(key = %key, "Client quota exhausted, skipping inner limiter");
            return Err(self.quota_exceeded(key));
        }

        self.inner.allow(ctx).await?;

        // The map may have filled while the inner limiter was deciding.
        if self.quota_spent(key) {
            return Err(self.quota_exceeded(key));
        }

        self.record_admission(key)
    }

    /// Count one admission for `key` unless a concurrent caller took the last slot.
    fn record_admission(&self, key: &str) -> Result<()> {
        let mut counts = self.counts.write();
        match counts.get_mut(key) {
            None => {
                counts.insert(key.to_string(), 1);
                trace!(key = %key, count = 1, "Client admitted");
                Ok(())
            }
            Some(count) if *count < self.max_per_key => {
                *count += 1;
                trace!(key = %key, count = *count, "Client admitted");
                Ok(())
            }
            Some(_) => {
                debug!(key = %key, "Client quota filled by a concurrent caller");
                Err(self.quota_exceeded(key))
            }
        }
    }

    fn quota_spent(&self, key: &str) -> bool {
        let counts = self.counts.read();
        counts.get(key).is_some_and(|count| *count >= self.max_per_key)
    }

    fn quota_exceeded(&self, key: &str) -> LimitError {
        LimitError::KeyQuotaExceeded {
            key: key.to_string(),
        }
    }

    /// Admissions recorded for `key` in the current epoch.
    pub fn count_for(&self, key: &str) -> u64 {
        self.counts.read().get(key).copied().unwrap_or(0)
    }

    /// Number of keys seen in the current epoch.
    pub fn tracked_keys(&self) -> usize {
        self.counts.read().len()
    }

    /// The per-key quota.
    pub fn max_per_key(&self) -> u64 {
        self.max_per_key
    }

    /// The wrapped limiter.
    pub fn inner(&self) -> &L {
        &self.inner
    }

    /// Stop the epoch reset task and close the wrapped limiter.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        self.inner.close();
        info!(
            max_per_key = self.max_per_key,
            reset_interval = ?self.reset_interval,
            "Keyed limiter closed"
        );
    }
}

async fn reset_epochs(counts: KeyCounts, period: Duration, shutdown: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let mut counts = counts.write();
                let keys = counts.len();
                *counts = HashMap::new();
                debug!(keys, "Client quotas reset");
            }
        }
    }
}

#[async_trait]
impl<L: Limiter> DistributedLimiter for KeyedLimiter<L> {
    async fn allow(&self, ctx: &Context, key: &str) -> Result<()> {
        self.allow_for(ctx, key).await
    }
}

impl<L> Drop for KeyedLimiter<L> {
    fn drop(&mut self) {
        // The wrapped limiter closes itself on drop where it owns a task.
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.shutdown.cancel();
        }
    }
}
