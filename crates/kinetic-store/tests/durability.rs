use std::sync::Arc;

use chrono::{Duration, Utc};
use kinetic_store::results::default_result_retention;
use kinetic_store::view_state::default_view_state_ttl;
use kinetic_store::{ResultStore, SharedKvStore, SqliteKvStore, TaskViewIndex, ViewStateStore};
use kinetic_types::{
    MealEntry, PlanDay, PlannedExercise, SurfaceKind, TaskId, TaskPayload, ViewState, WorkoutPlan,
};
use tempfile::TempDir;

async fn open_kv(dir: &TempDir) -> SharedKvStore {
    let store = SqliteKvStore::open(&dir.path().join("tasks.sqlite"))
        .await
        .unwrap();
    Arc::new(store)
}

fn sample_plan() -> WorkoutPlan {
    WorkoutPlan {
        title: "Three day split".to_string(),
        summary: "Push, pull, legs".to_string(),
        days: vec![PlanDay {
            label: "Push".to_string(),
            exercises: vec![PlannedExercise {
                name: "Bench press".to_string(),
                sets: 4,
                reps: "6-8".to_string(),
                notes: None,
            }],
        }],
    }
}

#[tokio::test]
async fn test_result_survives_process_restart() {
    let temp_dir = TempDir::new().unwrap();
    let id = TaskId::from("task_restart");
    {
        let results = ResultStore::new(open_kv(&temp_dir).await, default_result_retention());
        results
            .put(&id, TaskPayload::GeneratedPlan(sample_plan()), Utc::now())
            .await
            .unwrap();
    }

    let results = ResultStore::new(open_kv(&temp_dir).await, default_result_retention());
    let stored = results.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.payload, TaskPayload::GeneratedPlan(sample_plan()));
}

#[tokio::test]
async fn test_deleted_result_is_absent_until_put_again() {
    let temp_dir = TempDir::new().unwrap();
    let results = ResultStore::new(open_kv(&temp_dir).await, default_result_retention());
    let id = TaskId::from("task_3");
    let meal = MealEntry {
        name: "Oats".to_string(),
        calories: 410.0,
        protein_g: 18.0,
        carbs_g: 60.0,
        fat_g: 9.0,
        items: vec!["oats".to_string(), "whey".to_string()],
    };

    results
        .put(&id, TaskPayload::ParsedMeal(meal.clone()), Utc::now())
        .await
        .unwrap();
    assert!(results.delete(&id).await.unwrap());
    assert!(results.get(&id).await.unwrap().is_none());

    results
        .put(&id, TaskPayload::EditedMeal(meal.clone()), Utc::now())
        .await
        .unwrap();
    assert_eq!(
        results.get(&id).await.unwrap().map(|r| r.payload),
        Some(TaskPayload::EditedMeal(meal))
    );
}

#[tokio::test]
async fn test_stale_view_state_is_removed_on_load() {
    let temp_dir = TempDir::new().unwrap();
    let views = ViewStateStore::new(open_kv(&temp_dir).await, default_view_state_ttl());
    let surface = SurfaceKind::from("Chat");
    let now = Utc::now();

    views
        .save_at(&surface, &ViewState::new(), now - Duration::hours(25))
        .await
        .unwrap();

    assert!(views.load_at(&surface, now).await.unwrap().is_none());
    assert!(views.load_at(&surface, now).await.unwrap().is_none());
    assert!(!views.clear(&surface).await.unwrap(), "entry should already be gone");
}

#[tokio::test]
async fn test_index_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let id = TaskId::from("task_orphan");
    {
        let index = TaskViewIndex::new(open_kv(&temp_dir).await);
        index
            .associate(&id, &SurfaceKind::from("MacroChat"))
            .await
            .unwrap();
    }
    let index = TaskViewIndex::new(open_kv(&temp_dir).await);
    assert_eq!(
        index.tasks_for(&SurfaceKind::from("MacroChat")).await.unwrap(),
        vec![id]
    );
}
