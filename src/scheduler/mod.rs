//! Cron-driven job scheduler.
//!
//! Each tick goes through a local singleton guard (a jobs's own ticks
//! never overlap on one instance) and, if a [`Locker`] is configured, a
//! distributed lock (so only one instance across a fleet runs a given
//! tick). `BeforeStart`/`OnError`/`AfterStart` hooks fire around an
//! attempt/retry loop bounded by the job's timeout. `add` is rejected
//! once the scheduler has been shut down.

pub mod job;

pub use job::{Job, JobHooks, JobStats, NoopHooks};

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};

use crate::collaborators::Locker;
use crate::config::SchedulerConfig;
use crate::context::RequestContext;
use crate::error::{Error, Result};

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;

/// Per-job overrides for timeout/retry and the two concurrency guards.
/// Fields left `None` fall back to the scheduler's config defaults.
/// `singleton`/`distributed` default to `true`: opt a job out explicitly
/// if concurrent invocations of it are safe.
#[derive(Debug, Clone)]
pub struct JobOptions {
    pub timeout: Option<Duration>,
    pub retry_count: Option<u32>,
    pub retry_interval: Option<Duration>,
    /// Guards against this instance running two ticks of the same job at
    /// once, via a local compare-and-set.
    pub singleton: bool,
    /// Guards against two instances in a fleet running the same tick at
    /// once, via the scheduler's configured `Locker` (no-op if none is set).
    pub distributed: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self { timeout: None, retry_count: None, retry_interval: None, singleton: true, distributed: true }
    }
}

struct JobEntry {
    job: Arc<dyn Job>,
    hooks: Arc<dyn JobHooks>,
    cron_expr: String,
    timeout: Duration,
    retry_count: u32,
    retry_interval: Duration,
    singleton: bool,
    distributed: bool,
    state: AtomicU8,
    stats: std::sync::Mutex<JobStats>,
}

impl JobEntry {
    /// `ttl = max(configured lock ttl, job timeout + 1 minute)` so a
    /// distributed lock never expires while the job is still legitimately
    /// running.
    fn distributed_lock_ttl(&self, scheduler: &Scheduler) -> Duration {
        Duration::from_secs(scheduler.config.lock_ttl_secs).max(self.timeout + Duration::from_secs(60))
    }

    fn record_skip(&self) {
        self.stats.lock().expect("job stats mutex poisoned").skips += 1;
    }

    async fn tick(&self, scheduler: &Scheduler) {
        if self.singleton
            && self
                .state
                .compare_exchange(STATE_IDLE, STATE_RUNNING, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
        {
            self.record_skip(); // previous tick on this instance is still running
            return;
        }
        scheduler.in_flight.fetch_add(1, Ordering::SeqCst);

        let lock_owner = scheduler.instance_id.clone();
        let lock_key = format!("{}{}", scheduler.config.lock_prefix, self.job.name());

        let holds_lock = if self.distributed {
            match &scheduler.locker {
                Some(locker) => {
                    let lock_ttl = self.distributed_lock_ttl(scheduler);
                    locker.try_lock(&lock_key, &lock_owner, lock_ttl).await.unwrap_or(false)
                }
                None => true,
            }
        } else {
            true
        };

        if holds_lock {
            match self.hooks.before_start(self.job.name()).await {
                Ok(()) => {
                    let result = self.run_with_retries().await;
                    self.hooks.after_start(self.job.name(), &result).await;
                    self.record(&result);
                }
                Err(err) => {
                    tracing::warn!(job = %self.job.name(), error = %err, "before_start hook aborted tick");
                    self.record(&Err(err));
                }
            }

            if self.distributed {
                if let Some(locker) = &scheduler.locker {
                    let _ = locker.unlock(&lock_key, &lock_owner).await;
                }
            }
        } else {
            self.record_skip();
        }

        if self.singleton {
            self.state.store(STATE_IDLE, Ordering::SeqCst);
        }
        scheduler.in_flight.fetch_sub(1, Ordering::SeqCst);
        scheduler.notify.notify_waiters();
    }

    async fn run_with_retries(&self) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let ctx = RequestContext::new(format!("job:{}", self.job.name())).with_timeout(self.timeout);
            let outcome = tokio::time::timeout(self.timeout, self.job.run(&ctx))
                .await
                .unwrap_or(Err(Error::Timeout));

            match outcome {
                Ok(()) => return Ok(()),
                Err(err) => {
                    self.hooks.on_error(self.job.name(), &err, attempt).await;
                    if attempt > self.retry_count {
                        return Err(err);
                    }
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        }
    }

    fn record(&self, result: &Result<()>) {
        let mut stats = self.stats.lock().expect("job stats mutex poisoned");
        stats.attempts += 1;
        stats.last_run_at = Some(chrono::Utc::now());
        match result {
            Ok(()) => {
                stats.successes += 1;
                stats.last_error = None;
            }
            Err(err) => {
                stats.failures += 1;
                stats.last_error = Some(err.to_string());
            }
        }
    }
}

pub struct Scheduler {
    jobs: DashMap<String, Arc<JobEntry>>,
    locker: Option<Arc<dyn Locker>>,
    config: SchedulerConfig,
    instance_id: String,
    closed: AtomicBool,
    in_flight: AtomicU64,
    notify: tokio::sync::Notify,
    inner: AsyncMutex<Option<JobScheduler>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            jobs: DashMap::new(),
            locker: None,
            config,
            instance_id: uuid::Uuid::now_v7().to_string(),
            closed: AtomicBool::new(false),
            in_flight: AtomicU64::new(0),
            notify: tokio::sync::Notify::new(),
            inner: AsyncMutex::new(None),
        }
    }

    pub fn with_locker(mut self, locker: Arc<dyn Locker>) -> Self {
        self.locker = Some(locker);
        self
    }

    /// Registers a job under a cron expression with default options
    /// (singleton and distributed guards both enabled). Rejected once the
    /// scheduler has been closed via [`Scheduler::shutdown`].
    pub fn add(&self, job: Arc<dyn Job>, cron_expr: impl Into<String>, hooks: Arc<dyn JobHooks>) -> Result<()> {
        self.add_with_options(job, cron_expr, hooks, JobOptions::default())
    }

    /// Registers a job with explicit per-job overrides. See [`JobOptions`].
    pub fn add_with_options(
        &self,
        job: Arc<dyn Job>,
        cron_expr: impl Into<String>,
        hooks: Arc<dyn JobHooks>,
        options: JobOptions,
    ) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Internal("scheduler is closed".into()));
        }
        let name = job.name().to_string();
        let entry = Arc::new(JobEntry {
            job,
            hooks,
            cron_expr: cron_expr.into(),
            timeout: options.timeout.unwrap_or_else(|| Duration::from_secs(self.config.default_job_timeout_secs)),
            retry_count: options.retry_count.unwrap_or(self.config.default_retry_count),
            retry_interval: options
                .retry_interval
                .unwrap_or_else(|| Duration::from_secs(self.config.default_retry_interval_secs)),
            singleton: options.singleton,
            distributed: options.distributed,
            state: AtomicU8::new(STATE_IDLE),
            stats: std::sync::Mutex::new(JobStats::default()),
        });
        self.jobs.insert(name, entry);
        Ok(())
    }

    pub fn stats(&self, name: &str) -> Option<JobStats> {
        self.jobs.get(name).map(|entry| entry.stats.lock().expect("job stats mutex poisoned").clone())
    }

    /// Builds the cron engine and starts dispatching ticks.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut scheduler = JobScheduler::new().await.map_err(|e| Error::Internal(e.to_string()))?;

        for entry in self.jobs.iter() {
            let entry = entry.value().clone();
            let this = self.clone();
            let cron_job = CronJob::new_async(entry.cron_expr.as_str(), move |_uuid, _sched| {
                let entry = entry.clone();
                let this = this.clone();
                Box::pin(async move { entry.tick(&this).await })
            })
            .map_err(|e| Error::Internal(e.to_string()))?;
            scheduler.add(cron_job).await.map_err(|e| Error::Internal(e.to_string()))?;
        }

        scheduler.start().await.map_err(|e| Error::Internal(e.to_string()))?;
        *self.inner.lock().await = Some(scheduler);
        Ok(())
    }

    /// Runs a registered job immediately, outside its cron schedule, but
    /// through the same local/distributed guards and retry loop.
    pub async fn trigger(self: &Arc<Self>, name: &str) -> Result<()> {
        let entry = self.jobs.get(name).map(|e| e.value().clone()).ok_or_else(|| Error::NotFound(name.to_string()))?;
        entry.tick(self).await;
        Ok(())
    }

    /// Stops dispatching new ticks. Already-running ticks are left to
    /// finish; use [`Scheduler::shutdown`] to additionally wait for them.
    pub async fn stop(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(mut inner) = self.inner.lock().await.take() {
            inner.shutdown().await.map_err(|e| Error::Internal(e.to_string()))?;
        }
        Ok(())
    }

    /// Stops dispatching new ticks and blocks until every in-flight tick
    /// on this instance has completed.
    pub async fn shutdown(&self) -> Result<()> {
        self.stop().await?;
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            self.notify.notified().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct CountingJob(Arc<AtomicU32>);

    #[async_trait]
    impl Job for CountingJob {
        fn name(&self) -> &str {
            "counter"
        }

        async fn run(&self, _ctx: &RequestContext) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct AlwaysFailsJob;

    #[async_trait]
    impl Job for AlwaysFailsJob {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn run(&self, _ctx: &RequestContext) -> Result<()> {
            Err(Error::Internal("boom".into()))
        }
    }

    #[tokio::test]
    async fn trigger_runs_the_job_and_records_success_stats() {
        let scheduler = Arc::new(Scheduler::new(SchedulerConfig::default()));
        let calls = Arc::new(AtomicU32::new(0));
        scheduler.add(Arc::new(CountingJob(calls.clone())), "0 * * * * *", Arc::new(NoopHooks)).unwrap();

        scheduler.trigger("counter").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = scheduler.stats("counter").unwrap();
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 0);
    }

    #[tokio::test]
    async fn failing_job_retries_and_records_failure_after_exhaustion() {
        let mut config = SchedulerConfig::default();
        config.default_retry_count = 2;
        config.default_retry_interval_secs = 0;
        let scheduler = Arc::new(Scheduler::new(config));
        scheduler.add(Arc::new(AlwaysFailsJob), "0 * * * * *", Arc::new(NoopHooks)).unwrap();

        scheduler.trigger("flaky").await.unwrap();

        let stats = scheduler.stats("flaky").unwrap();
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.attempts, 1);
    }

    #[tokio::test]
    async fn add_is_rejected_after_shutdown() {
        let scheduler = Arc::new(Scheduler::new(SchedulerConfig::default()));
        scheduler.shutdown().await.unwrap();

        let err = scheduler.add(Arc::new(CountingJob(Arc::new(AtomicU32::new(0)))), "0 * * * * *", Arc::new(NoopHooks));
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn trigger_on_unknown_job_returns_not_found() {
        let scheduler = Arc::new(Scheduler::new(SchedulerConfig::default()));
        let result = scheduler.trigger("missing").await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    struct AbortingHooks;

    #[async_trait]
    impl JobHooks for AbortingHooks {
        async fn before_start(&self, _job_name: &str) -> Result<()> {
            Err(Error::Internal("before_start veto".into()))
        }
    }

    #[tokio::test]
    async fn before_start_hook_error_aborts_without_running_the_handler() {
        let scheduler = Arc::new(Scheduler::new(SchedulerConfig::default()));
        let calls = Arc::new(AtomicU32::new(0));
        scheduler
            .add(Arc::new(CountingJob(calls.clone())), "0 * * * * *", Arc::new(AbortingHooks))
            .unwrap();

        scheduler.trigger("counter").await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let stats = scheduler.stats("counter").unwrap();
        assert_eq!(stats.failures, 1);
    }

    #[tokio::test]
    async fn non_singleton_job_permits_concurrent_ticks() {
        let scheduler = Arc::new(Scheduler::new(SchedulerConfig::default()));
        let calls = Arc::new(AtomicU32::new(0));
        scheduler
            .add_with_options(
                Arc::new(CountingJob(calls.clone())),
                "0 * * * * *",
                Arc::new(NoopHooks),
                JobOptions { singleton: false, ..JobOptions::default() },
            )
            .unwrap();

        let entry = scheduler.jobs.get("counter").unwrap().value().clone();
        let scheduler2 = scheduler.clone();
        let entry2 = entry.clone();
        let first = tokio::spawn(async move { entry2.tick(&scheduler2).await });
        entry.tick(&scheduler).await;
        first.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let stats = scheduler.stats("counter").unwrap();
        assert_eq!(stats.skips, 0);
    }

    #[tokio::test]
    async fn singleton_job_skips_are_recorded() {
        let scheduler = Arc::new(Scheduler::new(SchedulerConfig::default()));
        let calls = Arc::new(AtomicU32::new(0));
        scheduler.add(Arc::new(CountingJob(calls.clone())), "0 * * * * *", Arc::new(NoopHooks)).unwrap();

        let entry = scheduler.jobs.get("counter").unwrap().value().clone();
        entry.state.store(STATE_RUNNING, Ordering::SeqCst);
        entry.tick(&scheduler).await;

        let stats = scheduler.stats("counter").unwrap();
        assert_eq!(stats.skips, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn distributed_lock_ttl_covers_the_job_timeout_with_a_minute_to_spare() {
        let mut config = SchedulerConfig::default();
        config.lock_ttl_secs = 60;
        let scheduler = Scheduler::new(config);
        let entry = JobEntry {
            job: Arc::new(CountingJob(Arc::new(AtomicU32::new(0)))),
            hooks: Arc::new(NoopHooks),
            cron_expr: "0 * * * * *".to_string(),
            timeout: Duration::from_secs(300),
            retry_count: 0,
            retry_interval: Duration::ZERO,
            singleton: true,
            distributed: true,
            state: AtomicU8::new(STATE_IDLE),
            stats: std::sync::Mutex::new(JobStats::default()),
        };
        assert_eq!(entry.distributed_lock_ttl(&scheduler), Duration::from_secs(360));
    }
}
