//! Lock-free fixed window limiter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::backend::Limiter;
use super::clock::{duration_to_nanos, Clock};
use crate::context::Context;
use crate::error::{LimitError, Result};

/// Admits at most `max_count` requests per fixed window.
///
/// Window start and count are two independent atomics. Rotating the window
/// and incrementing the count are separate steps, so a burst of callers
/// straddling a window boundary can admit a few more than `max_count`.
/// Rotation is attempted once per caller; a caller that loses the
/// compare-and-swap simply proceeds against whatever the winner left behind.
pub struct FixedWindowLimiter {
    /// Nanoseconds since `clock` epoch at which the current window opened
    window_start: AtomicU64,
    /// Admissions in the current window
    count: AtomicU64,
    window: Duration,
    window_nanos: u64,
    max_count: u64,
    clock: Clock,
}

impl FixedWindowLimiter {
    /// Create a limiter admitting `max_count` requests per `window`.
    pub fn new(window: Duration, max_count: u64) -> Self {
        Self {
            window_start: AtomicU64::new(0),
            count: AtomicU64::new(0),
            window,
            window_nanos: duration_to_nanos(window),
            max_count,
            clock: Clock::new(),
        }
    }

    /// Non-blocking admission check.
    pub fn try_allow(&self) -> Result<()> {
        let now = self.clock.now_nanos();
        let start = self.window_start.load(Ordering::Acquire);
        let count = self.count.load(Ordering::Acquire);

        if now >= start.saturating_add(self.window_nanos)
            && self
                .window_start
                .compare_exchange(start, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            // Losing this CAS means another caller already moved the count on.
            let _ = self
                .count
                .compare_exchange(count, 0, Ordering::AcqRel, Ordering::Acquire);
            debug!(previous_count = count, "Rotated fixed window");
        }

        let count = self.count.load(Ordering::Acquire);
        if count >= self.max_count {
            debug!(count, max_count = self.max_count, "Fixed window limit exceeded");
            return Err(LimitError::ExceededLimit);
        }

        self.count.fetch_add(1, Ordering::AcqRel);
        trace!(count = count + 1, "Fixed window admitted");
        Ok(())
    }

    /// Admissions recorded in the current window.
    pub fn current_count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// The window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Maximum admissions per window.
    pub fn max_count(&self) -> u64 {
        self.max_count
    }
}

#[async_trait]
impl Limiter for FixedWindowLimiter {
    async fn allow(&self, _ctx: &Context) -> Result<()> {
        self.try_allow()
    }

    /// Nothing runs in the background.
    fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_denies_over_max() {
        let limiter = FixedWindowLimiter::new(Duration::from_millis(100), 3);
        let ctx = Context::background();

        for _ in 0..3 {
            assert!(limiter.allow(&ctx).await.is_ok());
        }
        let err = limiter.allow(&ctx).await.unwrap_err();
        assert!(matches!(err, LimitError::ExceededLimit));
        assert_eq!(limiter.current_count(), 3);

        tokio::time::sleep(Duration::from_millis(101)).await;
        assert!(limiter.allow(&ctx).await.is_ok());
        assert_eq!(limiter.current_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_resets_every_window() {
        let limiter = FixedWindowLimiter::new(Duration::from_millis(10), 10);
        let ctx = Context::background();

        // One call per window never accumulates.
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(limiter.allow(&ctx).await.is_ok());
        }
        assert_eq!(limiter.current_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_exhausted_window_stays_closed() {
        let limiter = FixedWindowLimiter::new(Duration::from_secs(120), 10);
        let ctx = Context::background();

        for _ in 0..10 {
            limiter.allow(&ctx).await.unwrap();
        }
        for _ in 0..5 {
            assert!(limiter.allow(&ctx).await.is_err());
        }
        // Denials are not counted.
        assert_eq!(limiter.current_count(), 10);
    }

    #[test]
    fn test_fixed_window_concurrent_admissions_stay_near_max() {
        let limiter = Arc::new(FixedWindowLimiter::new(Duration::from_secs(60), 50));
        let threads = 8;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || (0..50).filter(|_| limiter.try_allow().is_ok()).count())
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        // The check and the increment race, so at most one extra per thread.
        assert!(admitted >= 50, "admitted {admitted}");
        assert!(admitted <= 50 + threads, "admitted {admitted}");
    }

    #[tokio::test]
    async fn test_fixed_window_close_is_noop() {
        let limiter = FixedWindowLimiter::new(Duration::from_secs(1), 1);
        limiter.close();
        limiter.close();
        assert!(limiter.allow(&Context::background()).await.is_ok());
        assert_eq!(limiter.window(), Duration::from_secs(1));
        assert_eq!(limiter.max_count(), 1);
    }
}
