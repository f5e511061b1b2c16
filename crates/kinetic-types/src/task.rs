use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of one tracked operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn generate() -> Self {
        Self(format!("task_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    PlanGeneration,
    PlanEdit,
    MealParse,
    MealEdit,
    ChatReply,
    Transcription,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::PlanGeneration => "plan_generation",
            TaskKind::PlanEdit => "plan_edit",
            TaskKind::MealParse => "meal_parse",
            TaskKind::MealEdit => "meal_edit",
            TaskKind::ChatReply => "chat_reply",
            TaskKind::Transcription => "transcription",
        }
    }

    /// Short human label used in failure notices.
    pub fn label(self) -> &'static str {
        match self {
            TaskKind::PlanGeneration => "plan generation",
            TaskKind::PlanEdit => "plan edit",
            TaskKind::MealParse => "meal analysis",
            TaskKind::MealEdit => "meal edit",
            TaskKind::ChatReply => "reply",
            TaskKind::Transcription => "transcription",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status. Transitions only ever go `Running -> Completed | Failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// Result of asking the registry about a task id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskLookup {
    Running,
    Completed,
    Failed,
    /// The registry of this process has no record of the id.
    Unknown,
}

impl From<Option<TaskStatus>> for TaskLookup {
    fn from(value: Option<TaskStatus>) -> Self {
        match value {
            Some(TaskStatus::Running) => TaskLookup::Running,
            Some(TaskStatus::Completed) => TaskLookup::Completed,
            Some(TaskStatus::Failed) => TaskLookup::Failed,
            None => TaskLookup::Unknown,
        }
    }
}

/// Why a task ended up failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The operation provider returned an error.
    Operation,
    /// Still running when the startup reaper found it past its age limit.
    Expired,
    /// Referenced by a surface but absent from both registry and result store.
    Orphaned,
}

impl FailureKind {
    /// Error code attached to log events for this failure class.
    pub fn error_code(self) -> &'static str {
        match self {
            FailureKind::Operation => "operation_failed",
            FailureKind::Expired => "expired_at_startup",
            FailureKind::Orphaned => "orphan_no_evidence",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    pub id: TaskId,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl TaskRecord {
    pub fn new(id: TaskId, kind: TaskKind, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            kind,
            status: TaskStatus::Running,
            started_at,
            ended_at: None,
            error: None,
            failure: None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
