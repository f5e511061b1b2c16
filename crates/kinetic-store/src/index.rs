use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kinetic_types::{SurfaceKind, TaskId};

use crate::error::StoreResult;
use crate::kv::SharedKvStore;

pub const TASK_SURFACE_NAMESPACE: &str = "task_surface";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Association {
    surface: SurfaceKind,
    associated_at: DateTime<Utc>,
}

/// Durable map from task id to the surface kind that started it.
pub struct TaskViewIndex {
    kv: SharedKvStore,
}

impl TaskViewIndex {
    pub fn new(kv: SharedKvStore) -> Self {
        Self { kv }
    }

    /// Record the owner of `task_id`, replacing any earlier owner.
    pub async fn associate(&self, task_id: &TaskId, surface: &SurfaceKind) -> StoreResult<()> {
        let encoded = serde_json::to_string(&Association {
            surface: surface.clone(),
            associated_at: Utc::now(),
        })?;
        self.kv
            .put(TASK_SURFACE_NAMESPACE, task_id.as_str(), &encoded)
            .await
    }

    pub async fn surface_for(&self, task_id: &TaskId) -> StoreResult<Option<SurfaceKind>> {
        let Some(raw) = self.kv.get(TASK_SURFACE_NAMESPACE, task_id.as_str()).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<Association>(&raw) {
            Ok(association) => Ok(Some(association.surface)),
            Err(err) => {
                tracing::warn!(task_id = %task_id, "unreadable task association: {}", err);
                Ok(None)
            }
        }
    }

    /// Returns whether an association existed.
    pub async fn clear(&self, task_id: &TaskId) -> StoreResult<bool> {
        self.kv
            .delete(TASK_SURFACE_NAMESPACE, task_id.as_str())
            .await
    }

    /// Every task currently addressed to `surface`, oldest association first.
    pub async fn tasks_for(&self, surface: &SurfaceKind) -> StoreResult<Vec<TaskId>> {
        let mut matches = Vec::new();
        for (key, raw) in self.kv.list(TASK_SURFACE_NAMESPACE).await? {
            let Ok(association) = serde_json::from_str::<Association>(&raw) else {
                continue;
            };
            if &association.surface == surface {
                matches.push((association.associated_at, TaskId::from(key)));
            }
        }
        matches.sort();
        Ok(matches.into_iter().map(|(_, id)| id).collect())
    }
}
