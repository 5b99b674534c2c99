//! Saga orchestration: an ordered list of steps, each with a forward
//! action and a compensating action, run sequentially against a shared
//! data bag. If a step fails, already-completed steps are compensated in
//! reverse order, best-effort — a failing compensation doesn't stop the
//! rest from running, it only changes the final status to
//! `compensate_failed`. A step that fails with nothing yet completed has
//! nothing to compensate and the saga ends `failed` instead.

pub mod step;
pub mod store;

pub use step::{SagaStep, StepHook, StepResult, StepRetry};
pub use store::{SagaRecord, SagaStore};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::{Error, Result};

/// Shared, mutable state steps read from and write to as the saga runs.
/// Backed by JSON values so steps defined independently can agree on a
/// wire-shaped contract without sharing Rust types.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SagaData {
    values: HashMap<String, Value>,
}

impl SagaData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Compensating,
    Compensated,
    CompensateFailed,
}

impl SagaStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed | SagaStatus::Failed | SagaStatus::Compensated | SagaStatus::CompensateFailed
        )
    }
}

pub struct Saga {
    name: String,
    steps: Vec<Arc<dyn SagaStep>>,
    before_step: Option<Arc<dyn StepHook>>,
    after_step: Option<Arc<dyn StepHook>>,
    timeout: Option<Duration>,
    store: Option<Arc<dyn SagaStore>>,
}

fn build_record(
    saga_id: &str,
    name: &str,
    status: SagaStatus,
    current_step: usize,
    step_results: &[StepResult],
    error: Option<String>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    data: &SagaData,
) -> SagaRecord {
    SagaRecord {
        saga_id: saga_id.to_string(),
        name: name.to_string(),
        status,
        current_step,
        step_results: step_results.to_vec(),
        error,
        started_at,
        completed_at,
        data: data.clone(),
    }
}

impl Saga {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), steps: Vec::new(), before_step: None, after_step: None, timeout: None, store: None }
    }

    pub fn add_step(mut self, step: Arc<dyn SagaStep>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_before_step(mut self, hook: Arc<dyn StepHook>) -> Self {
        self.before_step = Some(hook);
        self
    }

    pub fn with_after_step(mut self, hook: Arc<dyn StepHook>) -> Self {
        self.after_step = Some(hook);
        self
    }

    /// Applies to the saga as a whole, not per-step, unless the caller
    /// wraps an individual step's own forward/compensate calls with a
    /// tighter deadline themselves.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn SagaStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Runs the saga to completion and returns its id alongside the
    /// terminal status and final data bag. The id can be used to look the
    /// run back up via a configured [`SagaStore`] afterward.
    pub async fn run(&self, ctx: &RequestContext) -> Result<(String, SagaStatus, SagaData)> {
        let saga_ctx = match self.timeout {
            Some(timeout) => ctx.cascade(timeout),
            None => ctx.clone(),
        };

        let saga_id = Uuid::now_v7().to_string();
        let started_at = Utc::now();
        let mut data = SagaData::new();
        let mut completed: Vec<usize> = Vec::new();
        let mut step_results: Vec<StepResult> = Vec::new();

        let forward_err: Option<Error> = 'forward: {
            for (index, step) in self.steps.iter().enumerate() {
                if saga_ctx.is_expired() {
                    break 'forward Some(Error::Timeout);
                }
                if let Some(hook) = &self.before_step {
                    if let Err(err) = hook.call(&saga_ctx, step.name(), &data).await {
                        break 'forward Some(err);
                    }
                }

                let step_started = Instant::now();
                let mut attempt = 0u32;
                let result = loop {
                    let attempt_result = step.forward(&saga_ctx, &mut data).await;
                    match (&attempt_result, step.retry()) {
                        (Err(_), Some(retry)) if attempt + 1 < retry.attempts => {
                            attempt += 1;
                            tokio::time::sleep(retry.delay).await;
                            continue;
                        }
                        _ => break attempt_result,
                    }
                };
                let duration_ms = step_started.elapsed().as_millis() as u64;

                if let Some(hook) = &self.after_step {
                    if let Err(err) = hook.call(&saga_ctx, step.name(), &data).await {
                        if result.is_ok() {
                            completed.push(index);
                            step_results.push(StepResult {
                                name: step.name().to_string(),
                                status: SagaStatus::Completed,
                                error: None,
                                duration_ms,
                            });
                        }
                        break 'forward Some(err);
                    }
                }

                match result {
                    Ok(()) => {
                        completed.push(index);
                        step_results.push(StepResult {
                            name: step.name().to_string(),
                            status: SagaStatus::Completed,
                            error: None,
                            duration_ms,
                        });
                    }
                    Err(err) => {
                        step_results.push(StepResult {
                            name: step.name().to_string(),
                            status: SagaStatus::Failed,
                            error: Some(err.to_string()),
                            duration_ms,
                        });
                        break 'forward Some(err);
                    }
                }

                if let Some(store) = &self.store {
                    let _ = store
                        .save(&build_record(
                            &saga_id,
                            &self.name,
                            SagaStatus::Running,
                            completed.len(),
                            &step_results,
                            None,
                            started_at,
                            None,
                            &data,
                        ))
                        .await;
                }
            }
            None
        };

        let Some(err) = forward_err else {
            if let Some(store) = &self.store {
                let _ = store
                    .save(&build_record(
                        &saga_id,
                        &self.name,
                        SagaStatus::Completed,
                        self.steps.len(),
                        &step_results,
                        None,
                        started_at,
                        Some(Utc::now()),
                        &data,
                    ))
                    .await;
            }
            return Ok((saga_id, SagaStatus::Completed, data));
        };

        if completed.is_empty() {
            if let Some(store) = &self.store {
                let _ = store
                    .save(&build_record(
                        &saga_id,
                        &self.name,
                        SagaStatus::Failed,
                        0,
                        &step_results,
                        Some(err.to_string()),
                        started_at,
                        Some(Utc::now()),
                        &data,
                    ))
                    .await;
            }
            return Ok((saga_id, SagaStatus::Failed, data));
        }

        let mut compensate_failed = false;
        for &index in completed.iter().rev() {
            let step_name = self.steps[index].name();
            if let Err(compensate_err) = self.steps[index].compensate(&saga_ctx, &mut data).await {
                tracing::warn!(
                    saga = %self.name,
                    step = %step_name,
                    error = %compensate_err,
                    "saga compensation step failed, continuing with remaining compensations"
                );
                compensate_failed = true;
                if let Some(r) = step_results.iter_mut().find(|r| r.name == step_name) {
                    r.status = SagaStatus::CompensateFailed;
                }
            } else if let Some(r) = step_results.iter_mut().find(|r| r.name == step_name) {
                r.status = SagaStatus::Compensated;
            }
        }

        let final_status = if compensate_failed { SagaStatus::CompensateFailed } else { SagaStatus::Compensated };

        if let Some(store) = &self.store {
            let _ = store
                .save(&build_record(
                    &saga_id,
                    &self.name,
                    final_status,
                    completed.len(),
                    &step_results,
                    Some(err.to_string()),
                    started_at,
                    Some(Utc::now()),
                    &data,
                ))
                .await;
        }

        Ok((saga_id, final_status, data))
    }
}
