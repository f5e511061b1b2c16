//! Durable mirror of registry records.
//!
//! The registry writes every transition here so the next process can tell
//! which tasks were still running when it died.

use kinetic_types::{TaskId, TaskRecord};

use crate::error::StoreResult;
use crate::kv::SharedKvStore;

pub const TASKS_NAMESPACE: &str = "tasks";

pub struct TaskJournal {
    kv: SharedKvStore,
}

impl TaskJournal {
    pub fn new(kv: SharedKvStore) -> Self {
        Self { kv }
    }

    pub async fn upsert(&self, record: &TaskRecord) -> StoreResult<()> {
        let encoded = serde_json::to_string(record)?;
        self.kv
            .put(TASKS_NAMESPACE, record.id.as_str(), &encoded)
            .await
    }

    pub async fn remove(&self, task_id: &TaskId) -> StoreResult<bool> {
        self.kv.delete(TASKS_NAMESPACE, task_id.as_str()).await
    }

    /// All readable records. Corrupt entries are skipped and deleted.
    pub async fn load_all(&self) -> StoreResult<Vec<TaskRecord>> {
        let mut records = Vec::new();
        for (key, raw) in self.kv.list(TASKS_NAMESPACE).await? {
            match serde_json::from_str::<TaskRecord>(&raw) {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::warn!(task_id = %key, "dropping unreadable task record: {}", err);
                    self.kv.delete(TASKS_NAMESPACE, &key).await?;
                }
            }
        }
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(records)
    }
}
