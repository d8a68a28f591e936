use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;
use uuid::Uuid;

use super::{evaluate, namespaced, window_millis, DistributedLimiter, ScriptStore, WindowEval};
use crate::context::Context;
use crate::error::Result;

/// Sliding log limiter whose log lives in a shared store.
///
/// Timestamps are wall-clock epoch milliseconds taken on the calling host, so
/// hosts sharing a store should keep their clocks in sync.
pub struct DistributedSlidingWindow<S> {
    store: S,
    max_count: u64,
    window: Duration,
    prefix: Option<String>,
}

impl<S: ScriptStore> DistributedSlidingWindow<S> {
    /// Admit `max_count` requests per key within any trailing `window`.
    pub fn new(store: S, max_count: u64, window: Duration) -> Self {
        Self {
            store,
            max_count,
            window,
            prefix: None,
        }
    }

    /// Namespace every store key as `{prefix}:{key}`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Admission check evaluated as if the current time were `now_ms`.
    pub async fn allow_at(&self, ctx: &Context, key: &str, now_ms: i64) -> Result<()> {
        let store_key = namespaced(self.prefix.as_deref(), key);
        let member = Uuid::new_v4().to_string();
        trace!(key = %store_key, now_ms, "Checking distributed sliding window");

        let eval = WindowEval::SlidingWindow {
            key: &store_key,
            window_ms: window_millis(self.window),
            max_count: self.max_count,
            now_ms,
            member: &member,
        };
        evaluate(&self.store, ctx, eval).await
    }
}

#[async_trait]
impl<S: ScriptStore> DistributedLimiter for DistributedSlidingWindow<S> {
    async fn allow(&self, ctx: &Context, key: &str) -> Result<()> {
        self.allow_at(ctx, key, chrono::Utc::now().timestamp_millis())
            .await
    }
}
