use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use kinetic_types::{SurfaceKind, ViewState};

use crate::error::StoreResult;
use crate::kv::SharedKvStore;

pub const VIEW_STATE_NAMESPACE: &str = "view_state";

pub fn default_view_state_ttl() -> Duration {
    Duration::hours(24)
}

/// Snapshot/restore of per-surface transient state with a bounded lifetime.
pub struct ViewStateStore {
    kv: SharedKvStore,
    ttl: Duration,
    guard: Mutex<()>,
}

impl ViewStateStore {
    pub fn new(kv: SharedKvStore, ttl: Duration) -> Self {
        Self {
            kv,
            ttl,
            guard: Mutex::new(()),
        }
    }

    pub async fn save(&self, surface: &SurfaceKind, state: &ViewState) -> StoreResult<()> {
        self.save_at(surface, state, Utc::now()).await
    }

    /// Persist `state` stamped with `now` as its `last_updated`.
    pub async fn save_at(
        &self,
        surface: &SurfaceKind,
        state: &ViewState,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut snapshot = state.clone();
        snapshot.last_updated = now;
        let encoded = serde_json::to_string(&snapshot)?;
        let _guard = self.guard.lock().await;
        self.kv
            .put(VIEW_STATE_NAMESPACE, surface.as_str(), &encoded)
            .await
    }

    pub async fn load(&self, surface: &SurfaceKind) -> StoreResult<Option<ViewState>> {
        self.load_at(surface, Utc::now()).await
    }

    pub async fn load_at(
        &self,
        surface: &SurfaceKind,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<ViewState>> {
        let _guard = self.guard.lock().await;
        let Some(raw) = self.kv.get(VIEW_STATE_NAMESPACE, surface.as_str()).await? else {
            return Ok(None);
        };

        let state = match serde_json::from_str::<ViewState>(&raw) {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(surface = %surface, "dropping unreadable view state: {}", err);
                self.kv.delete(VIEW_STATE_NAMESPACE, surface.as_str()).await?;
                return Ok(None);
            }
        };

        if now - state.last_updated > self.ttl {
            tracing::debug!(surface = %surface, "view state expired, deleting");
            self.kv.delete(VIEW_STATE_NAMESPACE, surface.as_str()).await?;
            return Ok(None);
        }

        Ok(Some(state))
    }

    pub async fn clear(&self, surface: &SurfaceKind) -> StoreResult<bool> {
        let _guard = self.guard.lock().await;
        self.kv.delete(VIEW_STATE_NAMESPACE, surface.as_str()).await
    }

    pub async fn purge_expired(&self) -> StoreResult<usize> {
        self.purge_expired_at(Utc::now()).await
    }

    pub async fn purge_expired_at(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let _guard = self.guard.lock().await;
        let mut removed = 0;
        for (key, raw) in self.kv.list(VIEW_STATE_NAMESPACE).await? {
            let stale = match serde_json::from_str::<ViewState>(&raw) {
                Ok(state) => now - state.last_updated > self.ttl,
                Err(_) => true,
            };
            if stale && self.kv.delete(VIEW_STATE_NAMESPACE, &key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
