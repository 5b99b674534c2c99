//! Sliding window limiter over a FIFO of per-event timestamps.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::{Error, Result};

use super::RateLimiter;

struct Event {
    at: Instant,
    weight: u64,
}

pub struct SlidingWindowRateLimiter {
    limit: u64,
    window: Duration,
    events: Mutex<VecDeque<Event>>,
}

impl SlidingWindowRateLimiter {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window, events: Mutex::new(VecDeque::new()) }
    }

    fn evict_and_count(events: &mut VecDeque<Event>, window: Duration) -> u64 {
        let cutoff = Instant::now().checked_sub(window).unwrap_or_else(Instant::now);
        while let Some(front) = events.front() {
            if front.at < cutoff {
                events.pop_front();
            } else {
                break;
            }
        }
        events.iter().map(|e| e.weight).sum()
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowRateLimiter {
    async fn allow_n(&self, _ctx: &RequestContext, n: u64) -> bool {
        let mut events = self.events.lock().expect("sliding window mutex poisoned");
        let count = Self::evict_and_count(&mut events, self.window);
        if count + n <= self.limit {
            events.push_back(Event { at: Instant::now(), weight: n });
            true
        } else {
            false
        }
    }

    async fn wait_n(&self, ctx: &RequestContext, n: u64) -> Result<()> {
        loop {
            if self.allow_n(ctx, n).await {
                return Ok(());
            }

            let sleep_for = {
                let events = self.events.lock().expect("sliding window mutex poisoned");
                match events.front() {
                    Some(front) => {
                        let expires_at = front.at + self.window;
                        expires_at.saturating_duration_since(Instant::now())
                    }
                    None => Duration::from_millis(10),
                }
            };

            if ctx.is_expired() {
                return Err(Error::Timeout);
            }
            tokio::select! {
                _ = tokio::time::sleep(sleep_for.max(Duration::from_millis(1))) => {}
                _ = ctx.cancellation.cancelled() => return Err(Error::Timeout),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn denies_once_limit_reached_within_window() {
        let limiter = SlidingWindowRateLimiter::new(3, Duration::from_secs(10));
        let ctx = RequestContext::new("req-1");
        assert!(limiter.allow(&ctx).await);
        assert!(limiter.allow(&ctx).await);
        assert!(limiter.allow(&ctx).await);
        assert!(!limiter.allow(&ctx).await);
    }

    #[tokio::test]
    async fn old_events_fall_out_of_window() {
        let limiter = SlidingWindowRateLimiter::new(1, Duration::from_millis(30));
        let ctx = RequestContext::new("req-1");
        assert!(limiter.allow(&ctx).await);
        assert!(!limiter.allow(&ctx).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(limiter.allow(&ctx).await);
    }
}
