//! Pipeline middleware that gates a handler behind a [`Semaphore`].

use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::Error;
use crate::pipeline::{Handler, Middleware};

use super::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyPolicy {
    /// Reject immediately with [`Error::TooManyConcurrent`] (HTTP 503) if
    /// no permit is free. The default.
    FailFast,
    /// Block until a permit frees up or the request context expires.
    BlockUntilAcquire,
}

pub struct EndpointMiddleware;

impl EndpointMiddleware {
    /// Builds a middleware that wraps the next handler behind `semaphore`,
    /// enforcing `policy` on entry and always releasing the permit after
    /// the wrapped handler completes (success or error).
    pub fn wrap<S, Req, Resp>(semaphore: Arc<S>, policy: ConcurrencyPolicy) -> Middleware<Req, Resp>
    where
        S: Semaphore + 'static,
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        Arc::new(move |next: Arc<dyn Handler<Req, Resp>>| {
            let semaphore = semaphore.clone();
            let handler: Arc<dyn Handler<Req, Resp>> = Arc::new(move |ctx: RequestContext, req: Req| {
                let semaphore = semaphore.clone();
                let next = next.clone();
                async move {
                    match policy {
                        ConcurrencyPolicy::FailFast => {
                            if !semaphore.try_acquire().await {
                                return Err(Error::TooManyConcurrent);
                            }
                        }
                        ConcurrencyPolicy::BlockUntilAcquire => {
                            semaphore.acquire(&ctx).await?;
                        }
                    }
                    let result = next.call(ctx, req).await;
                    semaphore.release().await;
                    result
                }
            });
            handler
        })
    }
}
