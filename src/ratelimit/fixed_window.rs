//! Fixed window limiter. Rolls `window_start` when the window elapses,
//! resetting `count`. A request straddling the boundary can see up to
//! `2 * limit` admitted requests across the two adjacent windows — a
//! known, accepted tolerance rather than a bug.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::Result;

use super::{poll_until_allowed, RateLimiter};

struct State {
    window_start: Instant,
    count: u64,
}

pub struct FixedWindowRateLimiter {
    limit: u64,
    window: Duration,
    state: Mutex<State>,
}

impl FixedWindowRateLimiter {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window, state: Mutex::new(State { window_start: Instant::now(), count: 0 }) }
    }

    fn try_debit(&self, n: u64) -> bool {
        let mut state = self.state.lock().expect("fixed window mutex poisoned");
        let now = Instant::now();
        if now.duration_since(state.window_start) >= self.window {
            state.window_start = now;
            state.count = 0;
        }

        if state.count + n <= self.limit {
            state.count += n;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl RateLimiter for FixedWindowRateLimiter {
    async fn allow_n(&self, _ctx: &RequestContext, n: u64) -> bool {
        self.try_debit(n)
    }

    async fn wait_n(&self, ctx: &RequestContext, n: u64) -> Result<()> {
        poll_until_allowed(self, ctx, n).await
    }
}
