use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::error::Result;

use super::{SagaData, SagaStatus};

/// Step-local retry configuration for `forward`. `None` (the default on
/// [`SagaStep::retry`]) means a single attempt with no retry.
#[derive(Debug, Clone, Copy)]
pub struct StepRetry {
    /// Total attempts, including the first. Always at least 1.
    pub attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl StepRetry {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts: attempts.max(1), delay }
    }
}

/// One step of a saga: a forward action and the action that undoes it.
#[async_trait]
pub trait SagaStep: Send + Sync {
    fn name(&self) -> &str;

    /// Step-local retry policy for `forward`. Steps that are not safe to
    /// retry (non-idempotent side effects) should leave this at the
    /// default of `None`.
    fn retry(&self) -> Option<StepRetry> {
        None
    }

    async fn forward(&self, ctx: &RequestContext, data: &mut SagaData) -> Result<()>;

    /// Undoes `forward`. Called only for steps whose `forward` already
    /// succeeded, in reverse completion order. Errors here are logged and
    /// do not stop the remaining compensations from running.
    async fn compensate(&self, ctx: &RequestContext, data: &mut SagaData) -> Result<()>;
}

/// Runs before or after every step. Returning an error aborts the saga
/// exactly as if the step itself had failed.
#[async_trait]
pub trait StepHook: Send + Sync {
    async fn call(&self, ctx: &RequestContext, step_name: &str, data: &SagaData) -> Result<()>;
}

/// Outcome of a single step, as persisted on the saga record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub status: SagaStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}
