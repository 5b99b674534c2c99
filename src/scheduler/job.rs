use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::context::RequestContext;
use crate::error::{Error, Result};

/// A unit of scheduled work. `name` must be unique within a [`super::Scheduler`].
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &RequestContext) -> Result<()>;
}

/// Lifecycle hooks fired once per tick, regardless of whether this
/// instance actually won the distributed lock for that tick.
#[async_trait]
pub trait JobHooks: Send + Sync {
    /// Fires before every tick that won its guard(s). Returning an error
    /// aborts the tick without running the job's handler.
    async fn before_start(&self, _job_name: &str) -> Result<()> {
        Ok(())
    }

    async fn after_start(&self, _job_name: &str, _result: &Result<()>) {}

    async fn on_error(&self, _job_name: &str, _err: &Error, _attempt: u32) {}
}

/// No-op default, used when a job is registered without hooks.
pub struct NoopHooks;

#[async_trait]
impl JobHooks for NoopHooks {}

#[derive(Debug, Clone, Default)]
pub struct JobStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    /// Ticks that never ran the handler because a singleton or
    /// distributed-lock guard was already held.
    pub skips: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_duration_ms: Option<u64>,
}
