//! Distributed limiter over the external [`Counter`] collaborator.
//!
//! On counter error, the documented policy is fail-open (permit) — the
//! tradeoff is availability over strict enforcement, matching the same
//! tradeoff the scheduler's distributed lock makes in reverse.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::collaborators::Counter;
use crate::context::RequestContext;
use crate::error::Result;

use super::{poll_until_allowed, RateLimiter};

pub struct DistributedRateLimiter {
    counter: Arc<dyn Counter>,
    key: String,
    limit: i64,
    window: Duration,
}

impl DistributedRateLimiter {
    pub fn new(counter: Arc<dyn Counter>, key: impl Into<String>, limit: u64, window: Duration) -> Self {
        Self { counter, key: key.into(), limit: limit as i64, window }
    }

    async fn try_increment(&self, n: u64) -> bool {
        match self.counter.increment_by(&self.key, n as i64).await {
            Ok(count) => {
                if count == n as i64 {
                    // First increment in this window: arm the expiry.
                    let _ = self.counter.expire(&self.key, self.window).await;
                }
                count <= self.limit
            }
            Err(_) => true,
        }
    }
}

#[async_trait]
impl RateLimiter for DistributedRateLimiter {
    async fn allow_n(&self, _ctx: &RequestContext, n: u64) -> bool {
        self.try_increment(n).await
    }

    async fn wait_n(&self, ctx: &RequestContext, n: u64) -> Result<()> {
        poll_until_allowed(self, ctx, n).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryCounter;

    #[tokio::test]
    async fn permits_up_to_limit_then_denies() {
        let counter = Arc::new(InMemoryCounter::new());
        let limiter = DistributedRateLimiter::new(counter, "route:/orders", 3, Duration::from_secs(10));
        let ctx = RequestContext::new("req-1");

        assert!(limiter.allow(&ctx).await);
        assert!(limiter.allow(&ctx).await);
        assert!(limiter.allow(&ctx).await);
        assert!(!limiter.allow(&ctx).await);
    }

    #[tokio::test]
    async fn window_expiry_resets_the_counter() {
        let counter = Arc::new(InMemoryCounter::new());
        let limiter = DistributedRateLimiter::new(counter, "route:/orders", 1, Duration::from_millis(30));
        let ctx = RequestContext::new("req-1");

        assert!(limiter.allow(&ctx).await);
        assert!(!limiter.allow(&ctx).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(limiter.allow(&ctx).await);
    }
}
