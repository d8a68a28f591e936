//! Sliding log limiter.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::backend::Limiter;
use crate::context::Context;
use crate::error::{LimitError, Result};

/// Admits at most `max_count` requests within any trailing `window`.
///
/// Keeps one timestamp per admission, oldest first. The log is only pruned
/// once it is full, and each timestamp is removed at most once.
pub struct SlidingWindowLimiter {
    log: Mutex<VecDeque<Instant>>,
    window: Duration,
    max_count: usize,
}

impl SlidingWindowLimiter {
    /// Create a limiter admitting `max_count` requests per trailing `window`.
    pub fn new(window: Duration, max_count: usize) -> Self {
        Self {
            log: Mutex::new(VecDeque::with_capacity(max_count.min(4096))),
            window,
            max_count,
        }
    }

    /// Non-blocking admission check.
    pub fn try_allow(&self) -> Result<()> {
        let now = Instant::now();
        let mut log = self.log.lock();

        if log.len() < self.max_count {
            log.push_back(now);
            trace!(logged = log.len(), "Sliding window admitted");
            return Ok(());
        }

        let pruned = prune(&mut log, now, self.window);
        if log.len() >= self.max_count {
            debug!(
                logged = log.len(),
                max_count = self.max_count,
                "Sliding window limit exceeded"
            );
            return Err(LimitError::ExceededLimit);
        }

        log.push_back(now);
        trace!(pruned, logged = log.len(), "Sliding window admitted after pruning");
        Ok(())
    }

    /// Number of admissions currently held in the log.
    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.log.lock().is_empty()
    }

    /// The trailing window length.
    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Drop timestamps older than `now - window` from the front of the log.
fn prune(log: &mut VecDeque<Instant>, now: Instant, window: Duration) -> usize {
    let Some(boundary) = now.checked_sub(window) else {
        return 0;
    };
    let mut removed = 0;
    while let Some(&oldest) = log.front() {
        if oldest >= boundary {
            break;
        }
        log.pop_front();
        removed += 1;
    }
    removed
}

#[async_trait]
impl Limiter for SlidingWindowLimiter {
    async fn allow(&self, _ctx: &Context) -> Result<()> {
        self.try_allow()
    }

    fn close(&self) {}
}
