//! Durable outcome storage: at most one result per task id, expiring after a
//! retention window.
//!
//! Expiry is lazy (`get` deletes what it finds stale) with an optional eager
//! sweep through [`ResultStore::purge_expired`].

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use kinetic_types::{TaskId, TaskPayload, TaskResult};

use crate::error::StoreResult;
use crate::kv::SharedKvStore;

pub const RESULTS_NAMESPACE: &str = "results";

pub fn default_result_retention() -> Duration {
    Duration::days(7)
}

pub struct ResultStore {
    kv: SharedKvStore,
    retention: Duration,
    guard: Mutex<()>,
}

impl ResultStore {
    pub fn new(kv: SharedKvStore, retention: Duration) -> Self {
        Self {
            kv,
            retention,
            guard: Mutex::new(()),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Store `payload` under `task_id`, replacing any earlier result.
    pub async fn put(
        &self,
        task_id: &TaskId,
        payload: TaskPayload,
        completed_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let record = TaskResult {
            task_id: task_id.clone(),
            payload,
            completed_at,
        };
        let encoded = serde_json::to_string(&record)?;
        let _guard = self.guard.lock().await;
        self.kv
            .put(RESULTS_NAMESPACE, task_id.as_str(), &encoded)
            .await
    }

    pub async fn get(&self, task_id: &TaskId) -> StoreResult<Option<TaskResult>> {
        self.get_at(task_id, Utc::now()).await
    }

    pub async fn get_at(
        &self,
        task_id: &TaskId,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<TaskResult>> {
        let _guard = self.guard.lock().await;
        let Some(raw) = self.kv.get(RESULTS_NAMESPACE, task_id.as_str()).await? else {
            return Ok(None);
        };

        let record: TaskResult = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(task_id = %task_id, "dropping unreadable result entry: {}", err);
                self.kv.delete(RESULTS_NAMESPACE, task_id.as_str()).await?;
                return Ok(None);
            }
        };

        if self.is_expired(&record, now) {
            tracing::debug!(task_id = %task_id, "result expired, deleting");
            self.kv.delete(RESULTS_NAMESPACE, task_id.as_str()).await?;
            return Ok(None);
        }

        Ok(Some(record))
    }

    /// Returns whether a result was present.
    pub async fn delete(&self, task_id: &TaskId) -> StoreResult<bool> {
        let _guard = self.guard.lock().await;
        self.kv.delete(RESULTS_NAMESPACE, task_id.as_str()).await
    }

    pub async fn purge_expired(&self) -> StoreResult<usize> {
        self.purge_expired_at(Utc::now()).await
    }

    pub async fn purge_expired_at(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let _guard = self.guard.lock().await;
        let mut removed = 0;
        for (key, raw) in self.kv.list(RESULTS_NAMESPACE).await? {
            let stale = match serde_json::from_str::<TaskResult>(&raw) {
                Ok(record) => self.is_expired(&record, now),
                Err(_) => true,
            };
            if stale && self.kv.delete(RESULTS_NAMESPACE, &key).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, "result hygiene: purged expired results");
        }
        Ok(removed)
    }

    fn is_expired(&self, record: &TaskResult, now: DateTime<Utc>) -> bool {
        now - record.completed_at > self.retention
    }
}
