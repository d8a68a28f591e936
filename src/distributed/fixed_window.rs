use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use super::{evaluate, namespaced, window_millis, DistributedLimiter, ScriptStore, WindowEval};
use crate::context::Context;
use crate::error::Result;

/// Fixed window limiter whose counter lives in a shared store.
///
/// The counter for a key is created by its first evaluation and expires one
/// window later; every evaluation inside that window counts, denied ones
/// included.
pub struct DistributedFixedWindow<S> {
    store: S,
    max_count: u64,
    window: Duration,
    prefix: Option<String>,
}

impl<S: ScriptStore> DistributedFixedWindow<S> {
    /// Admit `max_count` requests per key per `window`.
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
}

#[async_trait]
impl<S: ScriptStore> DistributedLimiter for DistributedFixedWindow<S> {
    async fn allow(&self, ctx: &Context, key: &str) -> Result<()> {
        let store_key = namespaced(self.prefix.as_deref(), key);
        trace!(key = %store_key, "Checking distributed fixed window");

        let eval = WindowEval::FixedWindow {
            key: &store_key,
            max_count: self.max_count,
            window_ms: window_millis(self.window),
        };
        evaluate(&self.store, ctx, eval).await
    }
}
