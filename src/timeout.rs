//! Deadline enforcement middleware: races the wrapped handler against the
//! request's remaining time and returns a typed timeout error the moment
//! the deadline wins, without awaiting the loser.
//!
//! The context's own [`CancellationToken`] is triggered when the deadline
//! wins so any in-flight work the abandoned handler spawned observes the
//! cancellation and can wind down cooperatively, even though this
//! middleware itself stops polling that handler's future.

use std::sync::Arc;
use std::time::Duration;

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::pipeline::{Handler, Middleware};

pub struct TimeoutMiddleware;

impl TimeoutMiddleware {
    /// Enforces `budget` as the maximum time the wrapped handler may run,
    /// tightened to whatever remains on the context's own deadline if
    /// that is sooner. Exactly one outcome — the handler's result or
    /// [`Error::Timeout`] — is ever produced; the loser of the race is
    /// dropped, not awaited.
    pub fn wrap<Req, Resp>(budget: Duration) -> Middleware<Req, Resp>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        Arc::new(move |next: Arc<dyn Handler<Req, Resp>>| {
            let handler: Arc<dyn Handler<Req, Resp>> = Arc::new(move |ctx: RequestContext, req: Req| {
                let next = next.clone();
                let enforced = match ctx.remaining() {
                    Some(remaining) => remaining.min(budget),
                    None => budget,
                };
                let cascaded = ctx.cascade(enforced);
                let cancellation = ctx.cancellation.clone();
                async move {
                    tokio::select! {
                        result = next.call(cascaded, req) => result,
                        _ = tokio::time::sleep(enforced) => {
                            cancellation.cancel();
                            Err(Error::Timeout)
                        }
                    }
                }
            });
            handler
        })
    }

    /// Like [`wrap`], but on timeout calls `fallback` with a fresh,
    /// uncancelled context instead of returning [`Error::Timeout`]
    /// directly — e.g. to serve a cached or degraded response.
    pub fn wrap_with_fallback<Req, Resp, F>(budget: Duration, fallback: F) -> Middleware<Req, Resp>
    where
        Req: Send + Clone + 'static,
        Resp: Send + 'static,
        F: Fn(RequestContext, Req) -> Result<Resp> + Send + Sync + 'static,
    {
        let fallback = Arc::new(fallback);
        Arc::new(move |next: Arc<dyn Handler<Req, Resp>>| {
            let fallback = fallback.clone();
            let handler: Arc<dyn Handler<Req, Resp>> = Arc::new(move |ctx: RequestContext, req: Req| {
                let next = next.clone();
                let fallback = fallback.clone();
                let enforced = match ctx.remaining() {
                    Some(remaining) => remaining.min(budget),
                    None => budget,
                };
                let cascaded = ctx.cascade(enforced);
                let cancellation = ctx.cancellation.clone();
                let fallback_req = req.clone();
                let fallback_request_id = format!("{}-fallback", ctx.request_id);
                async move {
                    tokio::select! {
                        result = next.call(cascaded, req) => result,
                        _ = tokio::time::sleep(enforced) => {
                            cancellation.cancel();
                            fallback(RequestContext::new(fallback_request_id), fallback_req)
                        }
                    }
                }
            });
            handler
        })
    }
}
