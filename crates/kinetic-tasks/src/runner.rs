//! Per-task execution unit.
//!
//! `TaskRunner::start` registers the task, records which surface owns it and
//! spawns the provider call. The outcome is written to the result store
//! before the registry flips to a terminal status, then offered to the
//! caller through a oneshot channel if the caller is still listening.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::Level;

use kinetic_observability::{emit_event, redact_text, ObservabilityEvent, ProcessKind};
use kinetic_store::{ResultStore, TaskViewIndex};
use kinetic_types::{OperationRequest, SurfaceKind, TaskId, TaskKind, TaskPayload};

use crate::registry::SharedTaskRegistry;

const COMPONENT: &str = "task_runner";

/// The long-running external call (AI plan generation, meal parsing, ...).
/// Retries, if any, belong to the provider.
#[async_trait]
pub trait OperationProvider: Send + Sync {
    async fn perform(&self, request: OperationRequest) -> anyhow::Result<TaskPayload>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(TaskPayload),
    Failed(String),
}

/// Direct line to a task's outcome while the starting surface is alive.
pub struct TaskHandle {
    task_id: TaskId,
    kind: TaskKind,
    receiver: oneshot::Receiver<TaskOutcome>,
}

impl TaskHandle {
    pub fn id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Wait for the outcome. The result also stays in the durable store, so
    /// a caller that consumes it here must call
    /// [`crate::Reconciler::acknowledge`] or the next reconciliation of the
    /// surface delivers it again. [`crate::TaskRuntime::await_outcome`] does
    /// both.
    pub async fn outcome(self) -> TaskOutcome {
        self.receiver.await.unwrap_or_else(|_| {
            TaskOutcome::Failed("task stopped before reporting an outcome".to_string())
        })
    }

    /// Give up the direct line; the outcome stays reachable through
    /// reconciliation.
    pub fn detach(self) -> TaskId {
        self.task_id
    }
}

#[derive(Clone)]
pub struct TaskRunner {
    registry: SharedTaskRegistry,
    results: Arc<ResultStore>,
    index: Arc<TaskViewIndex>,
    provider: Arc<dyn OperationProvider>,
}

impl TaskRunner {
    pub fn new(
        registry: SharedTaskRegistry,
        results: Arc<ResultStore>,
        index: Arc<TaskViewIndex>,
        provider: Arc<dyn OperationProvider>,
    ) -> Self {
        Self {
            registry,
            results,
            index,
            provider,
        }
    }

    /// Start `request` on behalf of `surface`. Must be called from within a
    /// tokio runtime.
    pub async fn start(&self, surface: &SurfaceKind, request: OperationRequest) -> TaskHandle {
        let kind = request.kind();
        let task_id = self.registry.register(kind).await;

        if let Err(err) = self.index.associate(&task_id, surface).await {
            let detail = err.to_string();
            emit_event(
                Level::ERROR,
                ProcessKind::App,
                ObservabilityEvent {
                    event: "task_association_failed",
                    component: COMPONENT,
                    task_id: Some(task_id.as_str()),
                    task_kind: Some(kind.as_str()),
                    surface: Some(surface.as_str()),
                    error_code: Some("persistence_failed"),
                    detail: Some(&detail),
                    ..Default::default()
                },
            );
        }

        tracing::debug!(
            task_id = %task_id,
            surface = %surface,
            request = %request_summary(&request),
            "starting background task"
        );

        let (tx, rx) = oneshot::channel();
        let runner = self.clone();
        let spawned_id = task_id.clone();
        tokio::spawn(async move {
            let outcome = runner.drive(&spawned_id, kind, request).await;
            // the starting surface may be gone; reconciliation covers that case
            let _ = tx.send(outcome);
        });

        TaskHandle {
            task_id,
            kind,
            receiver: rx,
        }
    }

    async fn drive(
        &self,
        task_id: &TaskId,
        kind: TaskKind,
        request: OperationRequest,
    ) -> TaskOutcome {
        let call = AssertUnwindSafe(self.provider.perform(request)).catch_unwind();
        let result = match call.await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("operation panicked")),
        };

        match result {
            Ok(payload) => {
                if let Err(err) = self.results.put(task_id, payload.clone(), Utc::now()).await {
                    let detail = err.to_string();
                    emit_event(
                        Level::ERROR,
                        ProcessKind::App,
                        ObservabilityEvent {
                            event: "task_result_write_failed",
                            component: COMPONENT,
                            task_id: Some(task_id.as_str()),
                            task_kind: Some(kind.as_str()),
                            error_code: Some("persistence_failed"),
                            detail: Some(&detail),
                            ..Default::default()
                        },
                    );
                }
                self.registry.complete(task_id).await;
                TaskOutcome::Completed(payload)
            }
            Err(err) => {
                let reason = format!("{err:#}");
                self.registry.fail(task_id, reason.clone()).await;
                TaskOutcome::Failed(reason)
            }
        }
    }
}

fn request_summary(request: &OperationRequest) -> String {
    match request {
        OperationRequest::GeneratePlan { goals, .. } => {
            format!("generate_plan goals={}", redact_text(goals))
        }
        OperationRequest::EditPlan { plan, instruction } => format!(
            "edit_plan days={} instruction={}",
            plan.days.len(),
            redact_text(instruction)
        ),
        OperationRequest::ParseMeal { description } => {
            format!("parse_meal description={}", redact_text(description))
        }
        OperationRequest::EditMeal { instruction, .. } => {
            format!("edit_meal instruction={}", redact_text(instruction))
        }
        OperationRequest::ChatReply { conversation } => {
            format!("chat_reply messages={}", conversation.len())
        }
        OperationRequest::Transcribe { audio, mime_type } => {
            format!("transcribe bytes={} mime={}", audio.len(), mime_type)
        }
    }
}
