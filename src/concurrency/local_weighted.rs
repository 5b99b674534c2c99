//! Local weighted semaphore: a counter guarded by a ticket queue so
//! waiters are served in FIFO order regardless of the weight each one
//! asks for, plus a [`tokio::sync::Notify`] standing in for the condvar
//! a synchronous implementation would use to wake waiters on release.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::context::RequestContext;
use crate::error::{Error, Result};

use super::Semaphore;

struct State {
    available: u64,
    next_ticket: u64,
    now_serving: u64,
}

pub struct LocalWeightedSemaphore {
    capacity: u64,
    state: Mutex<State>,
    notify: Notify,
}

impl LocalWeightedSemaphore {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            state: Mutex::new(State { available: capacity, next_ticket: 0, now_serving: 0 }),
            notify: Notify::new(),
        }
    }

    fn take_ticket(&self) -> u64 {
        let mut state = self.state.lock().expect("weighted semaphore mutex poisoned");
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        ticket
    }

    fn try_serve(&self, ticket: u64, weight: u64) -> bool {
        let mut state = self.state.lock().expect("weighted semaphore mutex poisoned");
        if state.now_serving == ticket && state.available >= weight {
            state.available -= weight;
            state.now_serving += 1;
            true
        } else {
            false
        }
    }

    pub async fn acquire_weighted(&self, ctx: &RequestContext, weight: u64) -> Result<()> {
        let ticket = self.take_ticket();
        loop {
            if self.try_serve(ticket, weight) {
                self.notify.notify_waiters();
                return Ok(());
            }
            if ctx.is_expired() {
                return Err(Error::Timeout);
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(25)) => {}
                _ = ctx.cancellation.cancelled() => return Err(Error::Timeout),
            }
        }
    }

    pub fn try_acquire_weighted(&self, weight: u64) -> bool {
        let mut state = self.state.lock().expect("weighted semaphore mutex poisoned");
        // Bypasses the FIFO queue: only fair-shares with other blocking
        // waiters when no one is ahead in line.
        if state.now_serving == state.next_ticket && state.available >= weight {
            state.available -= weight;
            state.next_ticket += 1;
            state.now_serving += 1;
            true
        } else {
            false
        }
    }

    pub fn release_weighted(&self, weight: u64) {
        let mut state = self.state.lock().expect("weighted semaphore mutex poisoned");
        state.available = (state.available + weight).min(self.capacity);
        drop(state);
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl Semaphore for LocalWeightedSemaphore {
    async fn acquire(&self, ctx: &RequestContext) -> Result<()> {
        self.acquire_weighted(ctx, 1).await
    }

    async fn try_acquire(&self) -> bool {
        self.try_acquire_weighted(1)
    }

    async fn release(&self) {
        self.release_weighted(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn denies_when_weight_exceeds_available_capacity() {
        let sem = LocalWeightedSemaphore::new(5);
        assert!(sem.try_acquire_weighted(5));
        assert!(!sem.try_acquire_weighted(1));
    }

    #[tokio::test]
    async fn release_restores_weighted_capacity_capped_at_max() {
        let sem = LocalWeightedSemaphore::new(3);
        assert!(sem.try_acquire_weighted(3));
        sem.release_weighted(3);
        sem.release_weighted(3); // tolerated over-release, capped at capacity
        assert!(sem.try_acquire_weighted(3));
        assert!(!sem.try_acquire_weighted(1));
    }

    #[tokio::test]
    async fn waiters_are_served_in_fifo_ticket_order() {
        let sem = Arc::new(LocalWeightedSemaphore::new(1));
        assert!(sem.try_acquire_weighted(1));

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for id in 0..3u32 {
            let sem = sem.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let ctx = RequestContext::new(format!("req-{id}"));
                sem.acquire_weighted(&ctx, 1).await.unwrap();
                order.lock().unwrap().push(id);
                sem.release_weighted(1);
            }));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        sem.release_weighted(1);
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }
}
