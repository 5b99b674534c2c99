//! Durable tracking of in-flight and finished sagas, so a crashed
//! orchestrator can in principle resume or at least report what state a
//! saga was left in.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::step::StepResult;
use super::{SagaData, SagaStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaRecord {
    pub saga_id: String,
    pub name: String,
    pub status: SagaStatus,
    pub current_step: usize,
    pub step_results: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub data: SagaData,
}

#[async_trait]
pub trait SagaStore: Send + Sync {
    async fn save(&self, record: &SagaRecord) -> Result<()>;
    async fn get(&self, saga_id: &str) -> Result<Option<SagaRecord>>;
    async fn delete(&self, saga_id: &str) -> Result<()>;

    /// Lists records, optionally filtered to a single `status`, capped at
    /// `limit` entries (`0` means unlimited).
    async fn list(&self, status: Option<SagaStatus>, limit: usize) -> Result<Vec<SagaRecord>>;
}

/// Reference implementation over the generic [`Kv`](crate::collaborators::Kv)
/// collaborator, namespaced under `saga:`. Terminal records are written
/// with `record_ttl` so they expire instead of accumulating forever.
pub struct KvSagaStore {
    kv: Arc<dyn crate::collaborators::Kv>,
    record_ttl: Duration,
}

impl KvSagaStore {
    /// 24 hours, matching the default post-terminal retention window.
    const DEFAULT_RECORD_TTL: Duration = Duration::from_secs(24 * 60 * 60);

    pub fn new(kv: Arc<dyn crate::collaborators::Kv>) -> Self {
        Self::with_ttl(kv, Self::DEFAULT_RECORD_TTL)
    }

    pub fn with_ttl(kv: Arc<dyn crate::collaborators::Kv>, record_ttl: Duration) -> Self {
        Self { kv, record_ttl }
    }

    fn key(saga_id: &str) -> String {
        format!("saga:{saga_id}")
    }

    fn index_key() -> &'static str {
        "saga:index"
    }
}

#[async_trait]
impl SagaStore for KvSagaStore {
    async fn save(&self, record: &SagaRecord) -> Result<()> {
        let payload = serde_json::to_vec(record).map_err(|e| crate::error::Error::Internal(e.to_string()))?;
        let ttl = if record.status.is_terminal() { Some(self.record_ttl) } else { None };
        self.kv.set(&Self::key(&record.saga_id), payload, ttl).await?;

        let mut ids = self.list_ids().await?;
        if !ids.contains(&record.saga_id) {
            ids.push(record.saga_id.clone());
            let index = serde_json::to_vec(&ids).map_err(|e| crate::error::Error::Internal(e.to_string()))?;
            self.kv.set(Self::index_key(), index, None).await?;
        }
        Ok(())
    }

    async fn get(&self, saga_id: &str) -> Result<Option<SagaRecord>> {
        match self.kv.get(&Self::key(saga_id)).await? {
            Some(bytes) => {
                let record = serde_json::from_slice(&bytes).map_err(|e| crate::error::Error::Internal(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, saga_id: &str) -> Result<()> {
        self.kv.del(&[&Self::key(saga_id)]).await?;
        let mut ids = self.list_ids().await?;
        ids.retain(|id| id != saga_id);
        let index = serde_json::to_vec(&ids).map_err(|e| crate::error::Error::Internal(e.to_string()))?;
        self.kv.set(Self::index_key(), index, None).await
    }

    async fn list(&self, status: Option<SagaStatus>, limit: usize) -> Result<Vec<SagaRecord>> {
        let mut records = Vec::new();
        for id in self.list_ids().await? {
            if limit > 0 && records.len() >= limit {
                break;
            }
            if let Some(record) = self.get(&id).await? {
                let matches = match status {
                    Some(wanted) => wanted == record.status,
                    None => true,
                };
                if matches {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }
}

impl KvSagaStore {
    async fn list_ids(&self) -> Result<Vec<String>> {
        match self.kv.get(Self::index_key()).await? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| crate::error::Error::Internal(e.to_string())),
            None => Ok(Vec::new()),
        }
    }
}
