use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::TaskId;

/// Stable key naming a kind of UI surface ("PlanEditor", "MacroChat", ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceKind(String);

impl SurfaceKind {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SurfaceKind {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for SurfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
    /// System-generated notice, e.g. a failed background task.
    Notice,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            created_at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(ChatRole::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, text)
    }

    pub fn notice(text: impl Into<String>) -> Self {
        Self::new(ChatRole::Notice, text)
    }
}

/// Transient state of one surface kind, snapshotted before teardown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViewState {
    #[serde(default)]
    pub conversation: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<TaskId>,
    #[serde(default)]
    pub busy: bool,
    pub last_updated: DateTime<Utc>,
}

impl ViewState {
    pub fn new() -> Self {
        Self {
            conversation: Vec::new(),
            current_task_id: None,
            busy: false,
            last_updated: Utc::now(),
        }
    }

    /// Mark the surface as waiting on `task_id`.
    pub fn begin_task(&mut self, task_id: TaskId) {
        self.current_task_id = Some(task_id);
        self.busy = true;
    }

    /// Drop the waiting marker if it points at `task_id`.
    pub fn finish_task(&mut self, task_id: &TaskId) {
        if self.current_task_id.as_ref() == Some(task_id) {
            self.current_task_id = None;
            self.busy = false;
        }
    }
}

impl Default for ViewState {
    fn default() -> Self {
        Self::new()
    }
}
