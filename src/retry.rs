//! Retry middleware: classifies errors via [`Error::is_retryable_default`]
//! (or a caller-supplied predicate), backs off with jitter between
//! attempts, and replays the request from a buffered clone.
//!
//! Retry decisions are made purely from the error kind returned by the
//! wrapped handler — an idempotency hint on the request is deliberately
//! not consulted. A caller that wraps a non-idempotent operation in this
//! middleware is responsible for supplying a `should_retry` predicate
//! that excludes it; the middleware itself has no notion of "safe to
//! retry regardless of side effects".

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::context::RequestContext;
use crate::error::Error;
use crate::pipeline::{Handler, Middleware};

pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    factor: f64,
    jitter_fraction: f64,
    should_retry: Arc<dyn Fn(&Error) -> bool + Send + Sync>,
}

impl RetryPolicy {
    /// `max_attempts` counts the initial try, so `max_attempts = 3` means
    /// up to two retries after the first failure.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            factor: 2.0,
            jitter_fraction: 0.2,
            should_retry: Arc::new(Error::is_retryable_default),
        }
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn with_jitter_fraction(mut self, jitter_fraction: f64) -> Self {
        self.jitter_fraction = jitter_fraction;
        self
    }

    pub fn with_should_retry(mut self, should_retry: impl Fn(&Error) -> bool + Send + Sync + 'static) -> Self {
        self.should_retry = Arc::new(should_retry);
        self
    }

    /// `base * factor^attempt`, perturbed by up to `jitter_fraction` in
    /// either direction so a batch of retrying callers doesn't thunder in
    /// lockstep.
    fn backoff(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.as_secs_f64() * self.factor.powi(attempt as i32);
        let jitter_span = scaled * self.jitter_fraction;
        let jitter = rand::rng().random_range(-jitter_span..=jitter_span);
        Duration::from_secs_f64((scaled + jitter).max(0.0))
    }
}

pub struct RetryMiddleware;

impl RetryMiddleware {
    pub fn wrap<Req, Resp>(policy: RetryPolicy) -> Middleware<Req, Resp>
    where
        Req: Clone + Send + 'static,
        Resp: Send + 'static,
    {
        Arc::new(move |next: Arc<dyn Handler<Req, Resp>>| {
            let policy = Arc::new(RetryPolicy {
                max_attempts: policy.max_attempts,
                base_delay: policy.base_delay,
                factor: policy.factor,
                jitter_fraction: policy.jitter_fraction,
                should_retry: policy.should_retry.clone(),
            });
            let next = next.clone();
            let handler: Arc<dyn Handler<Req, Resp>> = Arc::new(move |ctx: RequestContext, req: Req| {
                let next = next.clone();
                let policy = policy.clone();
                async move {
                    let mut attempt = 0u32;
                    loop {
                        match next.call(ctx.clone(), req.clone()).await {
                            Ok(resp) => return Ok(resp),
                            Err(err) => {
                                attempt += 1;
                                if attempt >= policy.max_attempts || !(policy.should_retry)(&err) {
                                    return Err(err);
                                }
                                if ctx.is_expired() {
                                    return Err(err);
                                }
                                let delay = policy.backoff(attempt - 1);
                                tokio::select! {
                                    _ = tokio::time::sleep(delay) => {}
                                    _ = ctx.cancellation.cancelled() => return Err(err),
                                }
                            }
                        }
                    }
                }
            });
            handler
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success_within_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let terminal: Arc<dyn Handler<String, String>> = Arc::new(move |_ctx: RequestContext, req: String| {
            let calls = calls2.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(Error::Timeout)
                } else {
                    Ok(req)
                }
            }
        });
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let composed = Pipeline::new().wrap(RetryMiddleware::wrap(policy)).build(terminal);

        let result = composed.call(RequestContext::new("req-1"), "ok".to_string()).await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let terminal: Arc<dyn Handler<String, String>> = Arc::new(move |_ctx: RequestContext, _req: String| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Timeout)
            }
        });
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let composed = Pipeline::new().wrap(RetryMiddleware::wrap(policy)).build(terminal);

        let result = composed.call(RequestContext::new("req-1"), "x".to_string()).await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let terminal: Arc<dyn Handler<String, String>> = Arc::new(move |_ctx: RequestContext, _req: String| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Forbidden("no".to_string()))
            }
        });
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let composed = Pipeline::new().wrap(RetryMiddleware::wrap(policy)).build(terminal);

        let result = composed.call(RequestContext::new("req-1"), "x".to_string()).await;
        assert!(matches!(result, Err(Error::Forbidden(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn custom_should_retry_predicate_overrides_the_default_classification() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let terminal: Arc<dyn Handler<String, String>> = Arc::new(move |_ctx: RequestContext, _req: String| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Forbidden("no".to_string()))
            }
        });
        let policy = RetryPolicy::new(3, Duration::from_millis(1)).with_should_retry(|_| true);
        let composed = Pipeline::new().wrap(RetryMiddleware::wrap(policy)).build(terminal);

        let result = composed.call(RequestContext::new("req-1"), "x".to_string()).await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
