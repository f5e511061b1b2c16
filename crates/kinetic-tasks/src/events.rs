use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::Level;

use kinetic_observability::{emit_event, ObservabilityEvent, ProcessKind};
use kinetic_types::{TaskId, TaskKind, TaskRecord, TaskStatus};

/// Status change of a task, for surfaces that are visible while it runs.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub at: DateTime<Utc>,
}

impl TaskEvent {
    pub fn from_record(record: &TaskRecord) -> Self {
        Self {
            task_id: record.id.clone(),
            kind: record.kind,
            status: record.status,
            at: record.ended_at.unwrap_or(record.started_at),
        }
    }
}

#[derive(Clone)]
pub struct TaskEventBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl TaskEventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: TaskEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for TaskEventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn log_task_event(
    level: Level,
    component: &str,
    event: &str,
    record: &TaskRecord,
    error_code: Option<&str>,
) {
    emit_event(
        level,
        ProcessKind::App,
        ObservabilityEvent {
            event,
            component,
            task_id: Some(record.id.as_str()),
            task_kind: Some(record.kind.as_str()),
            status: Some(record.status.as_str()),
            error_code,
            detail: record.error.as_deref(),
            ..Default::default()
        },
    );
}
