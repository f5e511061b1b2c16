#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot, Mutex};

use kinetic_store::{KvStore, StoreError, StoreResult};
use kinetic_tasks::{ExecutionHost, GrantId, OperationProvider, TaskEvent};
use kinetic_types::{MealEntry, OperationRequest, TaskId, TaskPayload};

#[derive(Default)]
pub struct RecordingHost {
    next: AtomicU64,
    begun: AtomicUsize,
    ended: AtomicUsize,
}

impl RecordingHost {
    pub fn begun(&self) -> usize {
        self.begun.load(Ordering::SeqCst)
    }

    pub fn ended(&self) -> usize {
        self.ended.load(Ordering::SeqCst)
    }
}

impl ExecutionHost for RecordingHost {
    fn begin_grant(&self) -> Option<GrantId> {
        self.begun.fetch_add(1, Ordering::SeqCst);
        Some(self.next.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn end_grant(&self, _grant: GrantId) {
        self.ended.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn meal(name: &str) -> MealEntry {
    MealEntry {
        name: name.to_string(),
        calories: 540.0,
        protein_g: 38.0,
        carbs_g: 52.0,
        fat_g: 18.0,
        items: vec!["salmon".to_string(), "rice".to_string()],
    }
}

pub fn parse_meal(description: &str) -> OperationRequest {
    OperationRequest::ParseMeal {
        description: description.to_string(),
    }
}

/// Parses meals instantly, naming the entry after the description.
pub struct InstantProvider;

#[async_trait]
impl OperationProvider for InstantProvider {
    async fn perform(&self, request: OperationRequest) -> anyhow::Result<TaskPayload> {
        match request {
            OperationRequest::ParseMeal { description } => {
                Ok(TaskPayload::ParsedMeal(meal(&description)))
            }
            _ => Ok(TaskPayload::ChatReply("done".to_string())),
        }
    }
}

/// Holds each meal parse until the test opens its gate.
#[derive(Default)]
pub struct GatedProvider {
    gates: Mutex<HashMap<String, oneshot::Receiver<()>>>,
}

impl GatedProvider {
    pub async fn gate(&self, description: &str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().await.insert(description.to_string(), rx);
        tx
    }
}

#[async_trait]
impl OperationProvider for GatedProvider {
    async fn perform(&self, request: OperationRequest) -> anyhow::Result<TaskPayload> {
        let OperationRequest::ParseMeal { description } = request else {
            anyhow::bail!("unsupported request");
        };
        let gate = self.gates.lock().await.remove(&description);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        Ok(TaskPayload::ParsedMeal(meal(&description)))
    }
}

pub struct FailingProvider;

#[async_trait]
impl OperationProvider for FailingProvider {
    async fn perform(&self, _request: OperationRequest) -> anyhow::Result<TaskPayload> {
        Err(anyhow::anyhow!("upstream model overloaded"))
    }
}

pub struct PanickingProvider;

#[async_trait]
impl OperationProvider for PanickingProvider {
    async fn perform(&self, _request: OperationRequest) -> anyhow::Result<TaskPayload> {
        panic!("provider bug");
    }
}

/// Backend whose every call fails.
pub struct BrokenKvStore;

#[async_trait]
impl KvStore for BrokenKvStore {
    async fn get(&self, _namespace: &str, _key: &str) -> StoreResult<Option<String>> {
        Err(StoreError::Unavailable("disk detached".to_string()))
    }

    async fn put(&self, _namespace: &str, _key: &str, _value: &str) -> StoreResult<()> {
        Err(StoreError::Unavailable("disk detached".to_string()))
    }

    async fn delete(&self, _namespace: &str, _key: &str) -> StoreResult<bool> {
        Err(StoreError::Unavailable("disk detached".to_string()))
    }

    async fn list(&self, _namespace: &str) -> StoreResult<Vec<(String, String)>> {
        Err(StoreError::Unavailable("disk detached".to_string()))
    }
}

/// Wait for `task_id` to reach a terminal status on the event bus.
pub async fn wait_terminal(events: &mut broadcast::Receiver<TaskEvent>, task_id: &TaskId) {
    tokio::time::timeout(StdDuration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if &event.task_id == task_id && event.status.is_terminal() => return,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("task did not finish in time");
}
