use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::{TaskId, TaskKind};
use crate::view::ChatMessage;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannedExercise {
    pub name: String,
    pub sets: u32,
    pub reps: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanDay {
    pub label: String,
    #[serde(default)]
    pub exercises: Vec<PlannedExercise>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkoutPlan {
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub days: Vec<PlanDay>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MealEntry {
    pub name: String,
    pub calories: f64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
    #[serde(default)]
    pub items: Vec<String>,
}

/// Input handed to the operation provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationRequest {
    GeneratePlan {
        goals: String,
        #[serde(default)]
        profile: Value,
    },
    EditPlan {
        plan: WorkoutPlan,
        instruction: String,
    },
    ParseMeal {
        description: String,
    },
    EditMeal {
        meal: MealEntry,
        instruction: String,
    },
    ChatReply {
        conversation: Vec<ChatMessage>,
    },
    Transcribe {
        audio: Vec<u8>,
        mime_type: String,
    },
}

impl OperationRequest {
    pub fn kind(&self) -> TaskKind {
        match self {
            OperationRequest::GeneratePlan { .. } => TaskKind::PlanGeneration,
            OperationRequest::EditPlan { .. } => TaskKind::PlanEdit,
            OperationRequest::ParseMeal { .. } => TaskKind::MealParse,
            OperationRequest::EditMeal { .. } => TaskKind::MealEdit,
            OperationRequest::ChatReply { .. } => TaskKind::ChatReply,
            OperationRequest::Transcribe { .. } => TaskKind::Transcription,
        }
    }
}

/// Typed outcome of a successful operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TaskPayload {
    GeneratedPlan(WorkoutPlan),
    EditedPlan(WorkoutPlan),
    ParsedMeal(MealEntry),
    EditedMeal(MealEntry),
    ChatReply(String),
    Transcription(String),
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::GeneratedPlan(_) => TaskKind::PlanGeneration,
            TaskPayload::EditedPlan(_) => TaskKind::PlanEdit,
            TaskPayload::ParsedMeal(_) => TaskKind::MealParse,
            TaskPayload::EditedMeal(_) => TaskKind::MealEdit,
            TaskPayload::ChatReply(_) => TaskKind::ChatReply,
            TaskPayload::Transcription(_) => TaskKind::Transcription,
        }
    }
}

/// A payload as persisted under its task id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub payload: TaskPayload,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_tagged_with_its_variant() {
        let payload = TaskPayload::ChatReply("rest day tomorrow".to_string());
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["type"], "chat_reply");
        assert_eq!(value["data"], "rest day tomorrow");
        assert_eq!(payload.kind(), TaskKind::ChatReply);
    }

    #[test]
    fn request_kind_matches_payload_kind() {
        let request = OperationRequest::ParseMeal {
            description: "two eggs and toast".to_string(),
        };
        let payload = TaskPayload::ParsedMeal(MealEntry {
            name: "breakfast".to_string(),
            calories: 320.0,
            protein_g: 15.0,
            carbs_g: 30.0,
            fat_g: 14.0,
            items: vec!["eggs".to_string(), "toast".to_string()],
        });
        assert_eq!(request.kind(), payload.kind());
    }
}
