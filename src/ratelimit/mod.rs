//! Rate limiters: token bucket, sliding window, fixed window, and a
//! distributed limiter over the [`crate::collaborators::Counter`] seam.
//!
//! All limiters expose the same `Allow`/`AllowN`/`Wait`/`WaitN` contract so
//! pipeline middleware can be written once against the [`RateLimiter`]
//! trait and swapped between algorithms by configuration alone.

pub mod distributed;
pub mod fixed_window;
pub mod keyed;
pub mod sliding_window;
pub mod token_bucket;

pub use distributed::DistributedRateLimiter;
pub use fixed_window::FixedWindowRateLimiter;
pub use keyed::KeyedRateLimiter;
pub use sliding_window::SlidingWindowRateLimiter;
pub use token_bucket::TokenBucketRateLimiter;

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::{Error, Result};

#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn allow_n(&self, ctx: &RequestContext, n: u64) -> bool;
    async fn wait_n(&self, ctx: &RequestContext, n: u64) -> Result<()>;

    async fn allow(&self, ctx: &RequestContext) -> bool {
        self.allow_n(ctx, 1).await
    }

    async fn wait(&self, ctx: &RequestContext) -> Result<()> {
        self.wait_n(ctx, 1).await
    }
}

/// Shared `Wait*` loop: poll `allow_n`, sleeping a short, fixed interval
/// between attempts, until it succeeds or the context ends. Individual
/// limiters may override this with a more precise sleep calculation.
pub(crate) async fn poll_until_allowed<L: RateLimiter + ?Sized>(limiter: &L, ctx: &RequestContext, n: u64) -> Result<()> {
    const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(10);
    loop {
        if limiter.allow_n(ctx, n).await {
            return Ok(());
        }
        if ctx.is_expired() {
            return Err(Error::Timeout);
        }
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = ctx.cancellation.cancelled() => return Err(Error::Timeout),
        }
    }
}
