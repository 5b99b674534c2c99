//! Endpoint concurrency limiting: semaphores bound how many in-flight
//! requests a protected handler serves at once.
//!
//! All variants share one contract: `acquire` blocks (subject to context
//! cancellation) until a permit is free, `try_acquire` never blocks, and
//! `release` is tolerant of being called without a matching acquire —
//! callers that double-release or race a timeout against completion
//! don't corrupt the permit count.

pub mod distributed;
pub mod local_counted;
pub mod local_weighted;
pub mod middleware;

pub use distributed::DistributedSemaphore;
pub use local_counted::LocalCountedSemaphore;
pub use local_weighted::LocalWeightedSemaphore;
pub use middleware::{ConcurrencyPolicy, EndpointMiddleware};

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::Result;

#[async_trait]
pub trait Semaphore: Send + Sync {
    /// Blocks until a permit is available or `ctx` is cancelled.
    async fn acquire(&self, ctx: &RequestContext) -> Result<()>;

    /// Acquires a permit if one is immediately available, never blocks.
    async fn try_acquire(&self) -> bool;

    /// Returns a permit to the pool. Tolerant of being called without a
    /// prior successful acquire.
    async fn release(&self);
}
