//! The atomic evaluation contract between distributed limiters and their counter store.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;

use crate::error::Result;

static FIXED_WINDOW: OnceLock<Script> = OnceLock::new();
static SLIDING_WINDOW: OnceLock<Script> = OnceLock::new();

/// One admission evaluation to run atomically inside the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowEval<'a> {
    /// Increment the counter at `key`, arming its expiry on creation.
    FixedWindow {
        key: &'a str,
        max_count: u64,
        window_ms: u64,
    },
    /// Record `member` at `now_ms` in the log at `key` and drop stale entries.
    SlidingWindow {
        key: &'a str,
        window_ms: u64,
        max_count: u64,
        now_ms: i64,
        member: &'a str,
    },
}

impl<'a> WindowEval<'a> {
    /// The store key this evaluation touches.
    pub fn key(&self) -> &'a str {
        match *self {
            WindowEval::FixedWindow { key, .. } | WindowEval::SlidingWindow { key, .. } => key,
        }
    }

    /// Lua source of the procedure.
    pub fn source(&self) -> &'static str {
        match self {
            WindowEval::FixedWindow { .. } => include_str!("scripts/fixed_window.lua"),
            WindowEval::SlidingWindow { .. } => include_str!("scripts/sliding_window.lua"),
        }
    }

    fn script(&self) -> &'static Script {
        match self {
            WindowEval::FixedWindow { .. } => FIXED_WINDOW.get_or_init(|| Script::new(self.source())),
            WindowEval::SlidingWindow { .. } => {
                SLIDING_WINDOW.get_or_init(|| Script::new(self.source()))
            }
        }
    }
}

/// A shared counter store able to run a [`WindowEval`] as one indivisible step.
///
/// Implementations must never split the check and the mutation into separate
/// round trips: that is where cross-process correctness comes from.
#[async_trait]
pub trait ScriptStore: Send + Sync {
    /// Run the evaluation, returning `true` when the limit is exceeded.
    async fn eval_exceeded(&self, eval: &WindowEval<'_>) -> Result<bool>;
}

#[async_trait]
impl<S: ScriptStore + ?Sized> ScriptStore for Arc<S> {
    async fn eval_exceeded(&self, eval: &WindowEval<'_>) -> Result<bool> {
        (**self).eval_exceeded(eval).await
    }
}

/// Runs the procedures through `EVALSHA`, falling back to `EVAL` on a script cache miss.
#[async_trait]
impl ScriptStore for ConnectionManager {
    async fn eval_exceeded(&self, eval: &WindowEval<'_>) -> Result<bool> {
        let mut connection_manager = self.clone();
        let mut invocation = eval.script().prepare_invoke();
        invocation.key(eval.key());

        match *eval {
            WindowEval::FixedWindow {
                max_count,
                window_ms,
                ..
            } => {
                invocation.arg(max_count).arg(window_ms);
            }
            WindowEval::SlidingWindow {
                window_ms,
                max_count,
                now_ms,
                member,
                ..
            } => {
                invocation
                    .arg(window_ms)
                    .arg(max_count)
                    .arg(now_ms)
                    .arg(member);
            }
        }

        let exceeded: bool = invocation.invoke_async(&mut connection_manager).await?;
        Ok(exceeded)
    }
}
