//! Limiter trait for abstracting over the local admission algorithms.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::Result;

/// A single-process admission check.
///
/// `Ok(())` admits the unit of work. Every denial is an `Err` carrying the
/// reason, so callers can tell a policy rejection from a caller that gave up.
#[async_trait]
pub trait Limiter: Send + Sync {
    /// Decide whether one unit of work may proceed now.
    async fn allow(&self, ctx: &Context) -> Result<()>;

    /// Stop any background activity. Safe to call more than once.
    fn close(&self);
}

#[async_trait]
impl<L: Limiter + ?Sized> Limiter for Arc<L> {
    async fn allow(&self, ctx: &Context) -> Result<()> {
        (**self).allow(ctx).await
    }

    fn close(&self) {
        (**self).close()
    }
}

#[async_trait]
impl<L: Limiter + ?Sized> Limiter for Box<L> {
    async fn allow(&self, ctx: &Context) -> Result<()> {
        (**self).allow(ctx).await
    }

    fn close(&self) {
        (**self).close()
    }
}
