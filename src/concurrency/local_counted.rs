//! Local counted semaphore over a bounded channel of unit tokens.
//!
//! The channel itself is the permit pool: `acquire` receives a token,
//! `release` sends one back. A release without a matching acquire simply
//! fails to send (channel already full) and is silently dropped — the
//! documented no-op tolerance.

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::context::RequestContext;
use crate::error::{Error, Result};

use super::Semaphore;

pub struct LocalCountedSemaphore {
    tx: Sender<()>,
    rx: AsyncMutex<Receiver<()>>,
}

impl LocalCountedSemaphore {
    pub fn new(permits: usize) -> Self {
        let (tx, rx) = tokio::sync::mpsc::channel(permits.max(1));
        for _ in 0..permits {
            let _ = tx.try_send(());
        }
        Self { tx, rx: AsyncMutex::new(rx) }
    }
}

#[async_trait]
impl Semaphore for LocalCountedSemaphore {
    async fn acquire(&self, ctx: &RequestContext) -> Result<()> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            token = rx.recv() => {
                token.ok_or(Error::Internal("semaphore channel closed".into()))?;
                Ok(())
            }
            _ = ctx.cancellation.cancelled() => Err(Error::Timeout),
        }
    }

    async fn try_acquire(&self) -> bool {
        self.rx.lock().await.try_recv().is_ok()
    }

    async fn release(&self) {
        let _ = self.tx.try_send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_acquire_fails_once_exhausted() {
        let sem = LocalCountedSemaphore::new(2);
        assert!(sem.try_acquire().await);
        assert!(sem.try_acquire().await);
        assert!(!sem.try_acquire().await);
    }

    #[tokio::test]
    async fn release_replenishes_a_permit() {
        let sem = LocalCountedSemaphore::new(1);
        assert!(sem.try_acquire().await);
        assert!(!sem.try_acquire().await);
        sem.release().await;
        assert!(sem.try_acquire().await);
    }

    #[tokio::test]
    async fn release_without_acquire_is_a_tolerated_no_op() {
        let sem = LocalCountedSemaphore::new(1);
        sem.release().await;
        sem.release().await;
        assert!(sem.try_acquire().await);
        assert!(!sem.try_acquire().await);
    }

    #[tokio::test]
    async fn acquire_blocks_until_a_permit_is_released() {
        let sem = std::sync::Arc::new(LocalCountedSemaphore::new(1));
        let ctx = RequestContext::new("req-1");
        assert!(sem.try_acquire().await);

        let sem2 = sem.clone();
        let handle = tokio::spawn(async move {
            let ctx = RequestContext::new("req-2");
            sem2.acquire(&ctx).await
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        sem.release().await;
        assert!(handle.await.unwrap().is_ok());
        let _ = ctx;
    }
}
