//! Namespaced key-value interface shared by every durable store.
//!
//! Values are JSON strings; the typed stores on top own their encoding and
//! expiry rules. Each call is atomic per key. Sequences of calls are not, so
//! typed stores serialise their own read-modify-write paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{StoreError, StoreResult};

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<String>>;

    /// Insert or overwrite.
    async fn put(&self, namespace: &str, key: &str, value: &str) -> StoreResult<()>;

    /// Returns whether an entry was removed.
    async fn delete(&self, namespace: &str, key: &str) -> StoreResult<bool>;

    /// All entries of a namespace, ordered by key.
    async fn list(&self, namespace: &str) -> StoreResult<Vec<(String, String)>>;
}

pub type SharedKvStore = Arc<dyn KvStore>;

pub(crate) fn validate_key(namespace: &str, key: &str) -> StoreResult<()> {
    if namespace.trim().is_empty() {
        return Err(StoreError::InvalidKey("namespace cannot be empty".to_string()));
    }
    if key.trim().is_empty() {
        return Err(StoreError::InvalidKey(format!(
            "empty key in namespace {namespace}"
        )));
    }
    Ok(())
}

/// Process-local backend. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, BTreeMap<String, String>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedKvStore {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<String>> {
        validate_key(namespace, key)?;
        let entries = self.entries.lock().await;
        Ok(entries
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: &str) -> StoreResult<()> {
        validate_key(namespace, key)?;
        let mut entries = self.entries.lock().await;
        entries
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> StoreResult<bool> {
        validate_key(namespace, key)?;
        let mut entries = self.entries.lock().await;
        Ok(entries
            .get_mut(namespace)
            .and_then(|ns| ns.remove(key))
            .is_some())
    }

    async fn list(&self, namespace: &str) -> StoreResult<Vec<(String, String)>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(namespace)
            .map(|ns| ns.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}
