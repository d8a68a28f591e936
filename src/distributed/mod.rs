//! Limiters whose counters live in a store shared by many processes.
//!
//! Each admission is a single atomic evaluation inside the store, so no
//! client-side locking or retrying is needed for cross-process correctness.

mod fixed_window;
mod memory;
mod sliding_window;
mod store;

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

pub use fixed_window::DistributedFixedWindow;
pub use memory::MemoryStore;
pub use sliding_window::DistributedSlidingWindow;
pub use store::{ScriptStore, WindowEval};

use crate::context::Context;
use crate::error::{LimitError, Result};

/// An admission check partitioned by key.
///
/// `Ok(())` admits the request. Denials and store failures are errors.
#[async_trait]
pub trait DistributedLimiter: Send + Sync {
    /// Decide whether one request against `key` may proceed now.
    async fn allow(&self, ctx: &Context, key: &str) -> Result<()>;
}

#[async_trait]
impl<D: DistributedLimiter + ?Sized> DistributedLimiter for Arc<D> {
    async fn allow(&self, ctx: &Context, key: &str) -> Result<()> {
        (**self).allow(ctx, key).await
    }
}

#[async_trait]
impl<D: DistributedLimiter + ?Sized> DistributedLimiter for Box<D> {
    async fn allow(&self, ctx: &Context, key: &str) -> Result<()> {
        (**self).allow(ctx, key).await
    }
}

/// Store key for `key`, namespaced under `prefix` when one is set.
fn namespaced<'a>(prefix: Option<&str>, key: &'a str) -> Cow<'a, str> {
    match prefix {
        Some(prefix) => Cow::Owned(format!("{}:{}", prefix, key)),
        None => Cow::Borrowed(key),
    }
}

/// Window length in whole milliseconds, never zero.
fn window_millis(window: Duration) -> u64 {
    u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Run `eval` unless the caller gives up first, and map the store's verdict.
async fn evaluate<S: ScriptStore>(store: &S, ctx: &Context, eval: WindowEval<'_>) -> Result<()> {
    if let Some(err) = ctx.err() {
        return Err(err);
    }

    let exceeded = tokio::select! {
        biased;
        err = ctx.done() => return Err(err),
        res = store.eval_exceeded(&eval) => res?,
    };

    if exceeded {
        debug!(key = %eval.key(), "Distributed limit exceeded");
        Err(LimitError::ExceededLimit)
    } else {
        Ok(())
    }
}
