//! Read-and-deliver protocol a surface runs every time it becomes visible.
//!
//! Two sources are checked: the task the surface remembers waiting on
//! (from its saved view state) and every task the durable index addresses
//! to the same surface kind. Each terminal outcome is delivered once and
//! then cleared from the index, the result store and the registry.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::Level;

use kinetic_observability::{emit_event, ObservabilityEvent, ProcessKind};
use kinetic_store::{ResultStore, TaskViewIndex, ViewStateStore};
use kinetic_types::{
    ChatMessage, FailureKind, SurfaceKind, TaskId, TaskKind, TaskLookup, TaskPayload, ViewState,
};

use crate::registry::SharedTaskRegistry;

const COMPONENT: &str = "reconciler";

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveredOutcome {
    Success(TaskPayload),
    Failure { notice: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub task_id: TaskId,
    /// Absent when neither registry nor store remembered the task.
    pub kind: Option<TaskKind>,
    pub outcome: DeliveredOutcome,
}

#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub state: ViewState,
    pub deliveries: Vec<Delivery>,
    /// Whether a saved snapshot was found for the surface.
    pub restored: bool,
}

impl ReconcileOutcome {
    pub fn is_busy(&self) -> bool {
        self.state.busy
    }
}

enum Settlement {
    Pending,
    Delivered(Delivery),
}

pub struct Reconciler {
    registry: SharedTaskRegistry,
    results: Arc<ResultStore>,
    views: Arc<ViewStateStore>,
    index: Arc<TaskViewIndex>,
    pass: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        registry: SharedTaskRegistry,
        results: Arc<ResultStore>,
        views: Arc<ViewStateStore>,
        index: Arc<TaskViewIndex>,
    ) -> Self {
        Self {
            registry,
            results,
            views,
            index,
            pass: Mutex::new(()),
        }
    }

    pub async fn reconcile(&self, surface: &SurfaceKind) -> ReconcileOutcome {
        let _pass = self.pass.lock().await;

        let (mut state, restored) = match self.views.load(surface).await {
            Ok(Some(state)) => (state, true),
            Ok(None) => (ViewState::new(), false),
            Err(err) => {
                tracing::warn!(surface = %surface, "failed to load view state: {}", err);
                (ViewState::new(), false)
            }
        };

        let mut deliveries: Vec<Delivery> = Vec::new();

        if let Some(task_id) = state.current_task_id.clone() {
            match self.settle(surface, &task_id).await {
                Settlement::Pending => state.busy = true,
                Settlement::Delivered(delivery) => {
                    apply_delivery(&mut state, &delivery);
                    deliveries.push(delivery);
                }
            }
        }

        let orphans = match self.index.tasks_for(surface).await {
            Ok(ids) => ids,
            Err(err) => {
                tracing::warn!(surface = %surface, "failed to scan task index: {}", err);
                Vec::new()
            }
        };
        for task_id in orphans {
            if deliveries.iter().any(|d| d.task_id == task_id) {
                continue;
            }
            if let Settlement::Delivered(delivery) = self.settle(surface, &task_id).await {
                apply_delivery(&mut state, &delivery);
                deliveries.push(delivery);
            }
        }

        if !deliveries.is_empty() {
            if let Err(err) = self.views.save(surface, &state).await {
                tracing::warn!(surface = %surface, "failed to persist reconciled view state: {}", err);
            }
            tracing::info!(
                surface = %surface,
                delivered = deliveries.len(),
                "reconciled background tasks"
            );
        }

        ReconcileOutcome {
            state,
            deliveries,
            restored,
        }
    }

    /// Clear every trace of a task whose outcome the surface already
    /// received through its [`crate::TaskHandle`].
    pub async fn acknowledge(&self, task_id: &TaskId) {
        let _pass = self.pass.lock().await;
        self.consume(task_id).await;
    }

    async fn settle(&self, surface: &SurfaceKind, task_id: &TaskId) -> Settlement {
        let lookup = self.registry.status(task_id).await;
        let record = self.registry.get(task_id).await;
        let kind = record.as_ref().map(|r| r.kind);

        let outcome = match lookup {
            TaskLookup::Running => return Settlement::Pending,
            TaskLookup::Completed | TaskLookup::Unknown => {
                match self.results.get(task_id).await {
                    Ok(Some(result)) => DeliveredOutcome::Success(result.payload),
                    Ok(None) if lookup == TaskLookup::Completed => {
                        self.log_failure(surface, task_id, kind, "result_missing", None);
                        DeliveredOutcome::Failure {
                            notice: failure_notice(kind, "its result could not be recovered"),
                        }
                    }
                    Ok(None) => {
                        self.log_failure(
                            surface,
                            task_id,
                            kind,
                            FailureKind::Orphaned.error_code(),
                            None,
                        );
                        DeliveredOutcome::Failure {
                            notice: failure_notice(kind, "it timed out"),
                        }
                    }
                    Err(err) => {
                        // keep everything in place and retry on the next pass
                        tracing::warn!(task_id = %task_id, "failed to read result: {}", err);
                        return Settlement::Pending;
                    }
                }
            }
            TaskLookup::Failed => {
                // a reaped task may have stored its result just before the process died
                let reaped = record
                    .as_ref()
                    .is_some_and(|r| r.failure == Some(FailureKind::Expired));
                let recovered = if reaped {
                    self.results.get(task_id).await.ok().flatten()
                } else {
                    None
                };
                match recovered {
                    Some(result) => DeliveredOutcome::Success(result.payload),
                    None => {
                        let reason = record
                            .as_ref()
                            .and_then(|r| r.error.clone())
                            .unwrap_or_else(|| "unknown error".to_string());
                        DeliveredOutcome::Failure {
                            notice: failure_notice(kind, &reason),
                        }
                    }
                }
            }
        };

        self.consume(task_id).await;
        Settlement::Delivered(Delivery {
            task_id: task_id.clone(),
            kind: kind.or_else(|| match &outcome {
                DeliveredOutcome::Success(payload) => Some(payload.kind()),
                DeliveredOutcome::Failure { .. } => None,
            }),
            outcome,
        })
    }

    async fn consume(&self, task_id: &TaskId) {
        if let Err(err) = self.index.clear(task_id).await {
            tracing::warn!(task_id = %task_id, "failed to clear task association: {}", err);
        }
        if let Err(err) = self.results.delete(task_id).await {
            tracing::warn!(task_id = %task_id, "failed to delete consumed result: {}", err);
        }
        self.registry.remove(task_id).await;
    }

    fn log_failure(
        &self,
        surface: &SurfaceKind,
        task_id: &TaskId,
        kind: Option<TaskKind>,
        error_code: &str,
        detail: Option<&str>,
    ) {
        emit_event(
            Level::WARN,
            ProcessKind::App,
            ObservabilityEvent {
                event: "task_delivered_as_failed",
                component: COMPONENT,
                task_id: Some(task_id.as_str()),
                task_kind: kind.map(TaskKind::as_str),
                surface: Some(surface.as_str()),
                status: Some("failed"),
                error_code: Some(error_code),
                detail,
            },
        );
    }
}

fn failure_notice(kind: Option<TaskKind>, reason: &str) -> String {
    match kind {
        Some(kind) => format!("The {} didn't finish: {}.", kind.label(), reason),
        None => format!("A background task didn't finish: {}.", reason),
    }
}

fn apply_delivery(state: &mut ViewState, delivery: &Delivery) {
    state.finish_task(&delivery.task_id);
    if let DeliveredOutcome::Failure { notice } = &delivery.outcome {
        state.conversation.push(ChatMessage::notice(notice.clone()));
    }
}
