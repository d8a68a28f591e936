//! Error types for Turnstile admission checks.

use thiserror::Error;

/// Every reason an admission check can fail.
///
/// Callers usually only care which family a failure belongs to: see
/// [`LimitError::is_denial`], [`LimitError::is_cancellation`] and
/// [`LimitError::is_backend`].
#[derive(Error, Debug)]
pub enum LimitError {
    /// The limiter's shared counter, log or token supply is exhausted.
    #[error("rate limit exceeded")]
    ExceededLimit,

    /// The per-client quota of a keyed limiter is exhausted for this epoch.
    #[error("quota exceeded for client key {key:?}")]
    KeyQuotaExceeded {
        /// The client key that ran out of quota
        key: String,
    },

    /// The caller's context was cancelled while waiting.
    #[error("context cancelled")]
    Cancelled,

    /// The caller's deadline passed while waiting.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The shared counter store failed to evaluate the admission script.
    #[error("backend error: {0}")]
    Backend(#[from] redis::RedisError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LimitError {
    /// The request was rejected by policy; retrying later may succeed.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            LimitError::ExceededLimit | LimitError::KeyQuotaExceeded { .. }
        )
    }

    /// The caller gave up before a decision was made.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, LimitError::Cancelled | LimitError::DeadlineExceeded)
    }

    /// The limiter itself is unusable.
    pub fn is_backend(&self) -> bool {
        matches!(self, LimitError::Backend(_))
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, LimitError>;
