//! In-process counter store with the same semantics as the Redis procedures.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::store::{ScriptStore, WindowEval};
use crate::error::{LimitError, Result};

/// Minimum time between sweeps of expired keys.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

enum Record {
    Counter {
        count: u64,
        expires_at: Instant,
    },
    Log {
        /// (timestamp ms, member), ordered by timestamp
        entries: BTreeSet<(i64, String)>,
        expires_at: Instant,
    },
}

impl Record {
    fn expired(&self, now: Instant) -> bool {
        match self {
            Record::Counter { expires_at, .. } | Record::Log { expires_at, .. } => {
                *expires_at <= now
            }
        }
    }
}

/// A [`ScriptStore`] living in this process.
///
/// Each evaluation holds the key's shard lock for its whole duration, which
/// gives the same per-key atomicity as a server-side script. Share one
/// instance (behind an `Arc`) between every limiter that should see the same
/// counters.
///
/// Expired keys are swept out by evaluations at most once per second, so the
/// store holds roughly the keys touched within the last window.
pub struct MemoryStore {
    records: DashMap<String, Record>,
    next_sweep: Mutex<Instant>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_sweep: Mutex::new(Instant::now() + SWEEP_INTERVAL),
        }
    }

    /// Number of live keys.
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        self.records.iter().filter(|r| !r.value().expired(now)).count()
    }

    /// Drop every expired key.
    pub fn purge_expired(&self) -> usize {
        self.purge_at(Instant::now())
    }

    fn purge_at(&self, now: Instant) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| !record.expired(now));
        before.saturating_sub(self.records.len())
    }

    /// Purge if a sweep is due and no other caller is already running one.
    fn maybe_sweep(&self, now: Instant) {
        let Some(mut next_sweep) = self.next_sweep.try_lock() else {
            return;
        };
        if now < *next_sweep {
            return;
        }
        *next_sweep = now + SWEEP_INTERVAL;
        drop(next_sweep);

        let removed = self.purge_at(now);
        if removed > 0 {
            debug!(removed, remaining = self.records.len(), "Swept expired keys");
        }
    }

    fn eval(&self, eval: &WindowEval<'_>) -> Result<bool> {
        let now = Instant::now();
        // Must run before any entry guard is taken below.
        self.maybe_sweep(now);

        match *eval {
            WindowEval::FixedWindow {
                key,
                max_count,
                window_ms,
            } => {
                let fresh = || Record::Counter {
                    count: 0,
                    expires_at: now + Duration::from_millis(window_ms),
                };
                // The shard stays locked until `record` is dropped.
                let mut record = self.records.entry(key.to_string()).or_insert_with(fresh);
                if record.expired(now) {
                    *record = fresh();
                }
                let Record::Counter { count, .. } = &mut *record else {
                    return Err(wrong_type());
                };

                *count += 1;
                trace!(key = %key, count = *count, "Fixed window evaluated");
                Ok(*count > max_count)
            }
            WindowEval::SlidingWindow {
                key,
                window_ms,
                max_count,
                now_ms,
                member,
            } => {
                let fresh = || Record::Log {
                    entries: BTreeSet::new(),
                    expires_at: now,
                };
                let mut record = self.records.entry(key.to_string()).or_insert_with(fresh);
                if record.expired(now) {
                    *record = fresh();
                }
                let Record::Log {
                    entries,
                    expires_at,
                } = &mut *record
                else {
                    return Err(wrong_type());
                };

                let boundary = now_ms.saturating_sub(window_ms as i64);
                *entries = entries.split_off(&(boundary, String::new()));
                entries.insert((now_ms, member.to_string()));
                *expires_at = now + Duration::from_millis(window_ms);

                trace!(key = %key, logged = entries.len(), "Sliding window evaluated");
                Ok(entries.len() as u64 > max_count)
            }
        }
    }
}

fn wrong_type() -> LimitError {
    LimitError::Backend(redis::RedisError::from((
        redis::ErrorKind::TypeError,
        "WRONGTYPE Operation against a key holding the wrong kind of value",
    )))
}

#[async_trait]
impl ScriptStore for MemoryStore {
    async fn eval_exceeded(&self, eval: &WindowEval<'_>) -> Result<bool> {
        self.eval(eval)
    }
}
