//! Caller context: a deadline and a cancellation signal carried into every admission check.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::LimitError;

/// Deadline and cancellation state for one admission check.
///
/// Clones share the same cancellation token, so cancelling any clone ends
/// them all.
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl Context {
    /// A context that never ends on its own.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that ends `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A context that ends at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            token: CancellationToken::new(),
        }
    }

    /// A context that ends when `token` is cancelled.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            deadline: None,
            token,
        }
    }

    /// Derive a context that is cancelled with this one and also ends after `timeout`.
    ///
    /// The earlier of the two deadlines wins.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            deadline: Some(deadline),
            token: self.token.child_token(),
        }
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and every clone of it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Why the context has already ended, or `None` while it is still live.
    pub fn err(&self) -> Option<LimitError> {
        if self.token.is_cancelled() {
            return Some(LimitError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(LimitError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolve once the context ends, yielding the reason.
    pub async fn done(&self) -> LimitError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => LimitError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => LimitError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                LimitError::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_never_ends() {
        let ctx = Context::background();
        assert!(ctx.err().is_none());
        let res = tokio::time::timeout(Duration::from_millis(10), ctx.done()).await;
        assert!(res.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let ctx = Context::with_timeout(Duration::from_millis(5));
        assert!(ctx.err().is_none());

        let err = ctx.done().await;
        assert!(matches!(err, LimitError::DeadlineExceeded));
        assert!(matches!(ctx.err(), Some(LimitError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_cancel_reaches_clones() {
        let ctx = Context::with_timeout(Duration::from_secs(60));
        let clone = ctx.clone();
        ctx.cancel();

        assert!(matches!(clone.err(), Some(LimitError::Cancelled)));
        assert!(matches!(clone.done().await, LimitError::Cancelled));
    }

    #[tokio::test]
    async fn test_token_context() {
        let token = CancellationToken::new();
        let ctx = Context::with_token(token.clone());
        assert!(ctx.deadline().is_none());

        token.cancel();
        assert!(matches!(ctx.done().await, LimitError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_keeps_earlier_deadline() {
        let parent = Context::with_timeout(Duration::from_millis(10));
        let child = parent.child_with_timeout(Duration::from_secs(5));
        assert_eq!(child.deadline(), parent.deadline());

        let child = parent.child_with_timeout(Duration::from_millis(1));
        assert!(child.deadline() < parent.deadline());

        parent.cancel();
        assert!(matches!(child.err(), Some(LimitError::Cancelled)));
    }
}
