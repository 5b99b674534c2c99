//! Lazy-refill token bucket: `tokens = min(capacity, tokens + elapsed * rate)`.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::Result;

use super::{poll_until_allowed, RateLimiter};

struct State {
    tokens: f64,
    last_refill: Instant,
}

/// Concurrency-safe through a single lock around refill-then-debit.
pub struct TokenBucketRateLimiter {
    capacity: f64,
    rate_per_sec: f64,
    state: Mutex<State>,
}

impl TokenBucketRateLimiter {
    pub fn new(capacity: u64, rate_per_sec: f64) -> Self {
        Self {
            capacity: capacity as f64,
            rate_per_sec,
            state: Mutex::new(State { tokens: capacity as f64, last_refill: Instant::now() }),
        }
    }

    fn try_debit(&self, n: u64) -> bool {
        let mut state = self.state.lock().expect("token bucket mutex poisoned");
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.capacity);
        state.last_refill = now;

        let n = n as f64;
        if state.tokens >= n {
            state.tokens -= n;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl RateLimiter for TokenBucketRateLimiter {
    async fn allow_n(&self, _ctx: &RequestContext, n: u64) -> bool {
        self.try_debit(n)
    }

    async fn wait_n(&self, ctx: &RequestContext, n: u64) -> Result<()> {
        poll_until_allowed(self, ctx, n).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn depletes_then_refills_over_time() {
        let limiter = TokenBucketRateLimiter::new(10, 10.0);
        let ctx = RequestContext::new("req-1");

        for _ in 0..10 {
            assert!(limiter.allow(&ctx).await);
        }
        assert!(!limiter.allow(&ctx).await);

        tokio::time::sleep(Duration::from_millis(500)).await;
        // ~5 tokens should have accrued by now.
        assert!(limiter.allow_n(&ctx, 4).await);
    }

    #[tokio::test]
    async fn allow_n_debits_multiple_tokens_at_once() {
        let limiter = TokenBucketRateLimiter::new(10, 0.0);
        let ctx = RequestContext::new("req-1");
        assert!(limiter.allow_n(&ctx, 6).await);
        assert!(!limiter.allow_n(&ctx, 5).await);
        assert!(limiter.allow_n(&ctx, 4).await);
    }
}
