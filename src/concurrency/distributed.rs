//! Distributed counted semaphore over the [`Counter`] collaborator.
//!
//! A held permit is one unit in a shared counter with a TTL; the TTL is
//! refreshed periodically by callers holding a permit for longer than
//! the lease so a crashed holder's permit is eventually reclaimed.
//! Acquire failures retry with exponential backoff, capped at whatever
//! time remains on the request's deadline. As with the distributed rate
//! limiter, a counter error fails open rather than blocking traffic on a
//! backend outage.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::collaborators::Counter;
use crate::context::RequestContext;
use crate::error::{Error, Result};

use super::Semaphore;

pub struct DistributedSemaphore {
    counter: Arc<dyn Counter>,
    key: String,
    capacity: i64,
    lease_ttl: Duration,
}

impl DistributedSemaphore {
    pub fn new(counter: Arc<dyn Counter>, key: impl Into<String>, capacity: u64, lease_ttl: Duration) -> Self {
        Self { counter, key: key.into(), capacity: capacity as i64, lease_ttl }
    }

    async fn try_increment(&self) -> bool {
        match self.counter.increment_by(&self.key, 1).await {
            Ok(count) => {
                if count == 1 {
                    let _ = self.counter.expire(&self.key, self.lease_ttl).await;
                }
                if count <= self.capacity {
                    true
                } else {
                    let _ = self.counter.increment_by(&self.key, -1).await;
                    false
                }
            }
            Err(_) => true,
        }
    }

    /// Extends this holder's lease. Callers that hold a permit across a
    /// long-running operation should call this before `lease_ttl` elapses.
    pub async fn refresh_lease(&self) -> Result<()> {
        self.counter.expire(&self.key, self.lease_ttl).await
    }
}

#[async_trait]
impl Semaphore for DistributedSemaphore {
    async fn acquire(&self, ctx: &RequestContext) -> Result<()> {
        let mut backoff = Duration::from_millis(10);
        loop {
            if self.try_increment().await {
                return Ok(());
            }
            if ctx.is_expired() {
                return Err(Error::Timeout);
            }
            let wait = match ctx.remaining() {
                Some(remaining) => backoff.min(remaining),
                None => backoff,
            };
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = ctx.cancellation.cancelled() => return Err(Error::Timeout),
            }
            backoff = (backoff * 2).min(Duration::from_secs(1));
        }
    }

    async fn try_acquire(&self) -> bool {
        self.try_increment().await
    }

    async fn release(&self) {
        let _ = self.counter.increment_by(&self.key, -1).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryCounter;

    #[tokio::test]
    async fn permits_up_to_capacity_then_denies() {
        let counter = Arc::new(InMemoryCounter::new());
        let sem = DistributedSemaphore::new(counter, "job:export", 2, Duration::from_secs(30));
        assert!(sem.try_acquire().await);
        assert!(sem.try_acquire().await);
        assert!(!sem.try_acquire().await);
    }

    #[tokio::test]
    async fn release_frees_a_slot_for_the_next_acquire() {
        let counter = Arc::new(InMemoryCounter::new());
        let sem = DistributedSemaphore::new(counter, "job:export", 1, Duration::from_secs(30));
        assert!(sem.try_acquire().await);
        assert!(!sem.try_acquire().await);
        sem.release().await;
        assert!(sem.try_acquire().await);
    }

    #[tokio::test]
    async fn acquire_retries_until_a_slot_frees_up() {
        let counter = Arc::new(InMemoryCounter::new());
        let sem = Arc::new(DistributedSemaphore::new(counter, "job:export", 1, Duration::from_secs(30)));
        assert!(sem.try_acquire().await);

        let sem2 = sem.clone();
        let handle = tokio::spawn(async move {
            let ctx = RequestContext::new("req-2").with_timeout(Duration::from_secs(2));
            sem2.acquire(&ctx).await
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        sem.release().await;
        assert!(handle.await.unwrap().is_ok());
    }
}
