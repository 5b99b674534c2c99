//! Handler / middleware / pipeline composition model.
//!
//! A [`Handler`] is the terminal unit of request processing: given a
//! [`RequestContext`] and a request value, it produces a response or an
//! error. A [`Middleware`] wraps one handler to produce another handler
//! with the same shape, the same way `tower::Layer` wraps a `Service` but
//! without the `poll_ready` machinery this crate has no use for. A
//! [`Pipeline`] records middlewares in declaration order and wraps them
//! from the innermost handler outward, so the first-declared middleware
//! observes the request first and the response last.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::Result;

/// A boxed future returned by [`Handler::call`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The terminal unit of request processing.
///
/// Implemented for any `Fn(RequestContext, Req) -> impl Future<Output =
/// Result<Resp>>` via the blanket impl below, so ordinary async closures
/// can be used directly wherever a `Handler` is expected.
pub trait Handler<Req, Resp>: Send + Sync {
    fn call<'a>(&'a self, ctx: RequestContext, req: Req) -> BoxFuture<'a, Result<Resp>>
    where
        Req: 'a;
}

impl<Req, Resp, F, Fut> Handler<Req, Resp> for F
where
    F: Fn(RequestContext, Req) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Resp>> + Send + 'static,
    Req: Send + 'static,
{
    fn call<'a>(&'a self, ctx: RequestContext, req: Req) -> BoxFuture<'a, Result<Resp>>
    where
        Req: 'a,
    {
        Box::pin(self(ctx, req))
    }
}

/// A function that wraps one handler to produce another with the same
/// shape. Composition is left-to-right in declaration order: the first
/// middleware passed to [`Pipeline::wrap`] is the outermost layer.
pub type Middleware<Req, Resp> =
    Arc<dyn Fn(Arc<dyn Handler<Req, Resp>>) -> Arc<dyn Handler<Req, Resp>> + Send + Sync>;

/// Builds a handler by composing middlewares around a terminal handler.
///
/// ```ignore
/// let pipeline = Pipeline::new()
///     .wrap(auth_middleware)
///     .wrap(rate_limit_middleware)
///     .build(terminal_handler);
/// ```
///
/// `auth_middleware` runs first on the way in and last on the way out;
/// `rate_limit_middleware` is closer to the terminal handler.
pub struct Pipeline<Req, Resp> {
    middlewares: Vec<Middleware<Req, Resp>>,
}

impl<Req, Resp> Default for Pipeline<Req, Resp> {
    fn default() -> Self {
        Self { middlewares: Vec::new() }
    }
}

impl<Req, Resp> Pipeline<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware. Middlewares are applied in declaration order:
    /// the first one declared is the outermost wrapper around the
    /// terminal handler.
    pub fn wrap(mut self, middleware: Middleware<Req, Resp>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Wrap `terminal` with all recorded middlewares and return the
    /// composed handler.
    pub fn build(self, terminal: Arc<dyn Handler<Req, Resp>>) -> Arc<dyn Handler<Req, Resp>> {
        self.middlewares.into_iter().rev().fold(terminal, |handler, mw| mw(handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recording_middleware(
        order: Arc<AtomicUsize>,
        tag: &'static str,
        log: Arc<std::sync::Mutex<Vec<&'static str>>>,
    ) -> Middleware<String, String> {
        Arc::new(move |next| {
            let log = log.clone();
            let order = order.clone();
            let handler: Arc<dyn Handler<String, String>> =
                Arc::new(move |ctx: RequestContext, req: String| {
                    let next = next.clone();
                    let log = log.clone();
                    let _ = order.fetch_add(1, Ordering::SeqCst);
                    async move {
                        log.lock().unwrap().push(tag);
                        next.call(ctx, req).await
                    }
                });
            handler
        })
    }

    #[tokio::test]
    async fn middlewares_wrap_in_declaration_order() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let order = Arc::new(AtomicUsize::new(0));

        let terminal: Arc<dyn Handler<String, String>> =
            Arc::new(|_ctx: RequestContext, req: String| async move { Ok(format!("handled:{req}")) });

        let pipeline = Pipeline::new()
            .wrap(recording_middleware(order.clone(), "outer", log.clone()))
            .wrap(recording_middleware(order.clone(), "inner", log.clone()));

        let composed = pipeline.build(terminal);
        let ctx = RequestContext::new("req-1");
        let result = composed.call(ctx, "hi".to_string()).await.unwrap();

        assert_eq!(result, "handled:hi");
        assert_eq!(*log.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[tokio::test]
    async fn empty_pipeline_calls_terminal_directly() {
        let terminal: Arc<dyn Handler<String, String>> =
            Arc::new(|_ctx: RequestContext, req: String| async move { Ok(req) });
        let composed = Pipeline::new().build(terminal);
        let ctx = RequestContext::new("req-1");
        assert_eq!(composed.call(ctx, "x".to_string()).await.unwrap(), "x");
    }
}
