//! In-memory task table for the current process lifetime.
//!
//! The registry owns the execution-grant count: every `register` acquires
//! and the first terminal transition of a task releases, both inside the
//! same critical section as the table update. Records are mirrored into an
//! optional [`TaskJournal`] so the startup reaper of the next process can
//! find tasks that died mid-flight.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{broadcast, Mutex};
use tracing::Level;

use kinetic_store::TaskJournal;
use kinetic_types::{FailureKind, TaskId, TaskKind, TaskLookup, TaskRecord, TaskStatus};

use crate::events::{log_task_event, TaskEvent, TaskEventBus};
use crate::grant::{ExecutionGrant, ExecutionHost, GrantSnapshot};

const COMPONENT: &str = "task_registry";

pub type SharedTaskRegistry = Arc<TaskRegistry>;

/// How the startup reaper treats tasks still marked running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaperPolicy {
    /// No execution survives a process restart; every running task failed.
    FailAll,
    /// Fail only tasks that started more than this long ago.
    OlderThan(Duration),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartupReport {
    /// Records loaded from the journal of the previous process.
    pub restored: usize,
    pub expired: Vec<TaskId>,
    /// Running tasks left alone because they were younger than the limit.
    pub still_running: Vec<TaskId>,
}

pub struct TaskRegistry {
    state: Mutex<RegistryState>,
    journal: Option<TaskJournal>,
    events: TaskEventBus,
}

struct RegistryState {
    tasks: HashMap<TaskId, TaskRecord>,
    /// Tasks that took a grant reference in this process.
    holding: HashSet<TaskId>,
    grant: ExecutionGrant,
}

impl TaskRegistry {
    /// Registry without durable mirroring; the reaper has nothing to load.
    pub fn new(host: Arc<dyn ExecutionHost>) -> Self {
        Self::build(host, None)
    }

    pub fn with_journal(host: Arc<dyn ExecutionHost>, journal: TaskJournal) -> Self {
        Self::build(host, Some(journal))
    }

    fn build(host: Arc<dyn ExecutionHost>, journal: Option<TaskJournal>) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                tasks: HashMap::new(),
                holding: HashSet::new(),
                grant: ExecutionGrant::new(host),
            }),
            journal,
            events: TaskEventBus::new(),
        }
    }

    pub async fn register(&self, kind: TaskKind) -> TaskId {
        self.register_at(kind, Utc::now()).await
    }

    /// Insert a fresh running task and take a grant reference for it.
    pub async fn register_at(&self, kind: TaskKind, started_at: DateTime<Utc>) -> TaskId {
        let id = TaskId::generate();
        let record = TaskRecord::new(id.clone(), kind, started_at);

        let mut state = self.state.lock().await;
        state.grant.acquire();
        state.holding.insert(id.clone());
        state.tasks.insert(id.clone(), record.clone());
        self.mirror(&record).await;
        drop(state);

        log_task_event(Level::INFO, COMPONENT, "task_registered", &record, None);
        self.events.publish(TaskEvent::from_record(&record));
        id
    }

    /// Returns `false` when the id is unknown or already terminal.
    pub async fn complete(&self, task_id: &TaskId) -> bool {
        self.finish(task_id, TaskStatus::Completed, None, None, Utc::now())
            .await
    }

    /// Returns `false` when the id is unknown or already terminal.
    pub async fn fail(&self, task_id: &TaskId, reason: impl Into<String>) -> bool {
        self.finish(
            task_id,
            TaskStatus::Failed,
            Some(reason.into()),
            Some(FailureKind::Operation),
            Utc::now(),
        )
        .await
    }

    async fn finish(
        &self,
        task_id: &TaskId,
        status: TaskStatus,
        error: Option<String>,
        failure: Option<FailureKind>,
        now: DateTime<Utc>,
    ) -> bool {
        let mut state = self.state.lock().await;
        let Some(record) = state.tasks.get_mut(task_id) else {
            tracing::debug!(task_id = %task_id, "terminal transition for unknown task ignored");
            return false;
        };
        if record.is_terminal() {
            tracing::debug!(
                task_id = %task_id,
                status = record.status.as_str(),
                "duplicate terminal transition ignored"
            );
            return false;
        }

        record.status = status;
        record.ended_at = Some(now);
        record.error = error;
        record.failure = failure;
        let snapshot = record.clone();

        if state.holding.remove(task_id) {
            state.grant.release();
        }
        self.mirror(&snapshot).await;
        drop(state);

        let (level, event) = match status {
            TaskStatus::Completed => (Level::INFO, "task_completed"),
            _ => (Level::WARN, "task_failed"),
        };
        log_task_event(
            level,
            COMPONENT,
            event,
            &snapshot,
            failure.map(FailureKind::error_code),
        );
        self.events.publish(TaskEvent::from_record(&snapshot));
        true
    }

    pub async fn status(&self, task_id: &TaskId) -> TaskLookup {
        let state = self.state.lock().await;
        TaskLookup::from(state.tasks.get(task_id).map(|record| record.status))
    }

    pub async fn get(&self, task_id: &TaskId) -> Option<TaskRecord> {
        self.state.lock().await.tasks.get(task_id).cloned()
    }

    /// All known records, oldest first.
    pub async fn list(&self) -> Vec<TaskRecord> {
        let state = self.state.lock().await;
        let mut records = state.tasks.values().cloned().collect::<Vec<_>>();
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        records
    }

    pub async fn active_count(&self) -> usize {
        let state = self.state.lock().await;
        state
            .tasks
            .values()
            .filter(|record| record.status == TaskStatus::Running)
            .count()
    }

    pub async fn grant_snapshot(&self) -> GrantSnapshot {
        self.state.lock().await.grant.snapshot()
    }

    /// Forward a host-side grant expiry.
    pub async fn host_grant_expired(&self) {
        self.state.lock().await.grant.host_expired();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Forget a terminal task once its outcome has been consumed. Running
    /// tasks are never removed.
    pub async fn remove(&self, task_id: &TaskId) -> Option<TaskRecord> {
        let mut state = self.state.lock().await;
        if !state
            .tasks
            .get(task_id)
            .is_some_and(TaskRecord::is_terminal)
        {
            return None;
        }
        let removed = state.tasks.remove(task_id);
        if let Some(journal) = &self.journal {
            if let Err(err) = journal.remove(task_id).await {
                tracing::warn!(task_id = %task_id, "failed to drop journaled task: {}", err);
            }
        }
        removed
    }

    pub async fn prune(&self, max_age: Duration) -> usize {
        self.prune_at(Utc::now(), max_age).await
    }

    /// Drop terminal records that ended more than `max_age` ago.
    pub async fn prune_at(&self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let mut state = self.state.lock().await;
        let stale = state
            .tasks
            .values()
            .filter(|record| {
                record.is_terminal()
                    && now - record.ended_at.unwrap_or(record.started_at) > max_age
            })
            .map(|record| record.id.clone())
            .collect::<Vec<_>>();

        for id in &stale {
            state.tasks.remove(id);
            if let Some(journal) = &self.journal {
                if let Err(err) = journal.remove(id).await {
                    tracing::warn!(task_id = %id, "failed to drop journaled task: {}", err);
                }
            }
        }
        stale.len()
    }

    /// Startup reaper: fail running tasks older than `max_running_age`.
    pub async fn reconcile_on_startup(&self, max_running_age: Duration) -> StartupReport {
        self.reconcile_on_startup_at(Utc::now(), ReaperPolicy::OlderThan(max_running_age))
            .await
    }

    /// Load the previous lifetime's journal and reclassify zombie tasks.
    ///
    /// Running records already owned by this process are subject to the same
    /// age rule; their grant reference is released when they are failed.
    pub async fn reconcile_on_startup_at(
        &self,
        now: DateTime<Utc>,
        policy: ReaperPolicy,
    ) -> StartupReport {
        let mut report = StartupReport::default();
        let journaled = match &self.journal {
            Some(journal) => match journal.load_all().await {
                Ok(records) => records,
                Err(err) => {
                    tracing::error!("failed to load task journal at startup: {}", err);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let mut state = self.state.lock().await;
        for record in journaled {
            if state.tasks.contains_key(&record.id) {
                continue;
            }
            report.restored += 1;
            state.tasks.insert(record.id.clone(), record);
        }

        let zombies = state
            .tasks
            .values()
            .filter(|record| record.status == TaskStatus::Running)
            .filter(|record| match policy {
                ReaperPolicy::FailAll => true,
                ReaperPolicy::OlderThan(limit) => now - record.started_at > limit,
            })
            .map(|record| record.id.clone())
            .collect::<Vec<_>>();

        let mut expired_records = Vec::new();
        for id in zombies {
            let Some(record) = state.tasks.get_mut(&id) else {
                continue;
            };
            record.status = TaskStatus::Failed;
            record.ended_at = Some(now);
            record.error = Some("interrupted before it could finish".to_string());
            record.failure = Some(FailureKind::Expired);
            let snapshot = record.clone();
            if state.holding.remove(&id) {
                state.grant.release();
            }
            self.mirror(&snapshot).await;
            report.expired.push(id);
            expired_records.push(snapshot);
        }

        report.still_running = state
            .tasks
            .values()
            .filter(|record| {
                record.status == TaskStatus::Running && !state.holding.contains(&record.id)
            })
            .map(|record| record.id.clone())
            .collect();
        drop(state);

        for record in &expired_records {
            log_task_event(
                Level::WARN,
                COMPONENT,
                "task_expired",
                record,
                Some(FailureKind::Expired.error_code()),
            );
            self.events.publish(TaskEvent::from_record(record));
        }
        tracing::info!(
            restored = report.restored,
            expired = report.expired.len(),
            still_running = report.still_running.len(),
            "task registry startup reconciliation finished"
        );
        report
    }

    async fn mirror(&self, record: &TaskRecord) {
        let Some(journal) = &self.journal else {
            return;
        };
        if let Err(err) = journal.upsert(record).await {
            log_task_event(
                Level::ERROR,
                COMPONENT,
                "task_journal_write_failed",
                record,
                Some("persistence_failed"),
            );
            tracing::error!(task_id = %record.id, "failed to journal task record: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grant::testing::CountingHost;
    use kinetic_store::MemoryKvStore;

    fn registry_with_host() -> (TaskRegistry, Arc<CountingHost>) {
        let host = Arc::new(CountingHost::default());
        (TaskRegistry::new(host.clone()), host)
    }

    #[tokio::test]
    async fn register_starts_running_and_takes_grant() {
        let (registry, host) = registry_with_host();
        let id = registry.register(TaskKind::PlanGeneration).await;
        assert_eq!(registry.status(&id).await, TaskLookup::Running);
        assert_eq!(host.begun(), 1);
        assert_eq!(registry.grant_snapshot().await.active, 1);
    }

    #[tokio::test]
    async fn terminal_transitions_are_idempotent() {
        let (registry, host) = registry_with_host();
        let id = registry.register(TaskKind::MealParse).await;

        assert!(registry.complete(&id).await);
        assert!(!registry.complete(&id).await);
        assert!(!registry.fail(&id, "late failure").await);

        assert_eq!(registry.status(&id).await, TaskLookup::Completed);
        assert_eq!(host.ended(), 1);
        assert_eq!(registry.grant_snapshot().await.active, 0);
    }

    #[tokio::test]
    async fn failed_task_keeps_reason() {
        let (registry, _host) = registry_with_host();
        let id = registry.register(TaskKind::ChatReply).await;
        registry.fail(&id, "provider timed out").await;
        let record = registry.get(&id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("provider timed out"));
        assert_eq!(record.failure, Some(FailureKind::Operation));
    }

    #[tokio::test]
    async fn unknown_ids_are_ignored() {
        let (registry, host) = registry_with_host();
        let ghost = TaskId::from("task_ghost");
        assert!(!registry.complete(&ghost).await);
        assert_eq!(registry.status(&ghost).await, TaskLookup::Unknown);
        assert_eq!(host.ended(), 0);
    }

    #[tokio::test]
    async fn remove_refuses_running_tasks() {
        let (registry, _host) = registry_with_host();
        let id = registry.register(TaskKind::PlanEdit).await;
        assert!(registry.remove(&id).await.is_none());
        registry.complete(&id).await;
        assert!(registry.remove(&id).await.is_some());
        assert_eq!(registry.status(&id).await, TaskLookup::Unknown);
    }

    #[tokio::test]
    async fn reaper_fails_stale_running_task_in_process() {
        let (registry, host) = registry_with_host();
        let now = Utc::now();
        let stale = registry
            .register_at(TaskKind::PlanGeneration, now - Duration::minutes(6))
            .await;
        let fresh = registry
            .register_at(TaskKind::PlanGeneration, now - Duration::minutes(1))
            .await;

        let report = registry
            .reconcile_on_startup_at(now, ReaperPolicy::OlderThan(Duration::minutes(5)))
            .await;

        assert_eq!(report.expired, vec![stale.clone()]);
        assert_eq!(registry.status(&stale).await, TaskLookup::Failed);
        assert_eq!(registry.status(&fresh).await, TaskLookup::Running);
        assert_eq!(registry.grant_snapshot().await.active, 1);
        assert_eq!(host.ended(), 0);
    }

    #[tokio::test]
    async fn reaper_restores_journal_from_previous_process() {
        let kv = MemoryKvStore::shared();
        let now = Utc::now();
        let (stale, fresh) = {
            let previous = TaskRegistry::with_journal(
                Arc::new(CountingHost::default()),
                TaskJournal::new(kv.clone()),
            );
            let stale = previous
                .register_at(TaskKind::MealEdit, now - Duration::minutes(10))
                .await;
            let fresh = previous
                .register_at(TaskKind::Transcription, now - Duration::minutes(2))
                .await;
            (stale, fresh)
        };

        let host = Arc::new(CountingHost::default());
        let registry = TaskRegistry::with_journal(host.clone(), TaskJournal::new(kv));
        assert_eq!(registry.status(&stale).await, TaskLookup::Unknown);

        let report = registry
            .reconcile_on_startup_at(now, ReaperPolicy::OlderThan(Duration::minutes(5)))
            .await;
        assert_eq!(report.restored, 2);
        assert_eq!(report.expired, vec![stale.clone()]);
        assert_eq!(report.still_running, vec![fresh.clone()]);

        let record = registry.get(&stale).await.unwrap();
        assert_eq!(record.failure, Some(FailureKind::Expired));
        // restored tasks never hold a grant in the new process
        assert_eq!(registry.grant_snapshot().await.active, 0);
        assert_eq!(host.begun(), 0);
    }

    #[tokio::test]
    async fn fail_all_policy_reaps_young_tasks_too() {
        let kv = MemoryKvStore::shared();
        let id = {
            let previous = TaskRegistry::with_journal(
                Arc::new(CountingHost::default()),
                TaskJournal::new(kv.clone()),
            );
            previous.register(TaskKind::ChatReply).await
        };
        let registry =
            TaskRegistry::with_journal(Arc::new(CountingHost::default()), TaskJournal::new(kv));
        let report = registry
            .reconcile_on_startup_at(Utc::now(), ReaperPolicy::FailAll)
            .await;
        assert_eq!(report.expired, vec![id.clone()]);
        assert_eq!(registry.status(&id).await, TaskLookup::Failed);
    }

    #[tokio::test]
    async fn prune_drops_old_terminal_records() {
        let (registry, _host) = registry_with_host();
        let done = registry.register(TaskKind::ChatReply).await;
        let running = registry.register(TaskKind::ChatReply).await;
        registry.complete(&done).await;

        let later = Utc::now() + Duration::days(8);
        assert_eq!(registry.prune_at(later, Duration::days(7)).await, 1);
        assert_eq!(registry.status(&done).await, TaskLookup::Unknown);
        assert_eq!(registry.status(&running).await, TaskLookup::Running);
    }

    #[tokio::test]
    async fn subscribers_see_terminal_events() {
        let (registry, _host) = registry_with_host();
        let mut events = registry.subscribe();
        let id = registry.register(TaskKind::Transcription).await;
        registry.complete(&id).await;

        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        assert_eq!(first.status, TaskStatus::Running);
        assert_eq!(second.task_id, id);
        assert_eq!(second.status, TaskStatus::Completed);
    }
}
