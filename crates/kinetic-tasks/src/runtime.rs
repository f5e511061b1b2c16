//! Wiring of stores, registry, runner and reconciler for one process.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};

use kinetic_store::{
    ResultStore, SharedKvStore, SqliteKvStore, StoreResult, TaskJournal, TaskViewIndex,
    ViewStateStore,
};
use kinetic_types::{OperationRequest, SurfaceKind, ViewState};

use crate::config::TaskRuntimeConfig;
use crate::grant::ExecutionHost;
use crate::reconcile::{ReconcileOutcome, Reconciler};
use crate::registry::{SharedTaskRegistry, StartupReport, TaskRegistry};
use crate::runner::{OperationProvider, TaskHandle, TaskOutcome, TaskRunner};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HousekeepingReport {
    pub pruned_tasks: usize,
    pub purged_results: usize,
    pub purged_views: usize,
}

pub struct TaskRuntime {
    config: TaskRuntimeConfig,
    registry: SharedTaskRegistry,
    results: Arc<ResultStore>,
    views: Arc<ViewStateStore>,
    index: Arc<TaskViewIndex>,
    runner: TaskRunner,
    reconciler: Reconciler,
    startup: StartupReport,
}

impl TaskRuntime {
    /// Open `tasks.sqlite` under the configured data dir and run startup
    /// reconciliation.
    pub async fn open(
        config: TaskRuntimeConfig,
        provider: Arc<dyn OperationProvider>,
        host: Arc<dyn ExecutionHost>,
    ) -> anyhow::Result<Self> {
        let db_path = config.database_path();
        let store = SqliteKvStore::open(&db_path)
            .await
            .with_context(|| format!("failed to open task store at {}", db_path.display()))?;
        match store.namespace_counts().await {
            Ok(counts) => tracing::debug!(?counts, "task store entries by namespace"),
            Err(err) => tracing::warn!("failed to count task store entries: {}", err),
        }
        Ok(Self::with_store(config, Arc::new(store), provider, host).await)
    }

    pub async fn with_store(
        config: TaskRuntimeConfig,
        kv: SharedKvStore,
        provider: Arc<dyn OperationProvider>,
        host: Arc<dyn ExecutionHost>,
    ) -> Self {
        let results = Arc::new(ResultStore::new(kv.clone(), config.result_ttl()));
        let views = Arc::new(ViewStateStore::new(kv.clone(), config.view_state_ttl()));
        let index = Arc::new(TaskViewIndex::new(kv.clone()));
        let registry = Arc::new(TaskRegistry::with_journal(host, TaskJournal::new(kv)));

        let startup = registry
            .reconcile_on_startup_at(Utc::now(), config.reaper_policy())
            .await;

        let runner = TaskRunner::new(
            registry.clone(),
            results.clone(),
            index.clone(),
            provider,
        );
        let reconciler = Reconciler::new(
            registry.clone(),
            results.clone(),
            views.clone(),
            index.clone(),
        );

        let runtime = Self {
            config,
            registry,
            results,
            views,
            index,
            runner,
            reconciler,
            startup,
        };

        let housekeeping = if runtime.config.purge_on_startup {
            runtime.housekeeping().await
        } else {
            HousekeepingReport::default()
        };

        tracing::info!(
            data_dir = %runtime.config.data_dir.display(),
            restored = runtime.startup.restored,
            expired = runtime.startup.expired.len(),
            still_running = runtime.startup.still_running.len(),
            pruned_tasks = housekeeping.pruned_tasks,
            purged_results = housekeeping.purged_results,
            purged_views = housekeeping.purged_views,
            "task runtime ready"
        );

        runtime
    }

    /// Drop terminal records, results and snapshots past their windows.
    pub async fn housekeeping(&self) -> HousekeepingReport {
        self.housekeeping_at(Utc::now()).await
    }

    pub async fn housekeeping_at(&self, now: DateTime<Utc>) -> HousekeepingReport {
        let pruned_tasks = self.registry.prune_at(now, self.config.result_ttl()).await;
        let purged_results = self
            .results
            .purge_expired_at(now)
            .await
            .unwrap_or_else(|err| {
                tracing::warn!("failed to purge expired results: {}", err);
                0
            });
        let purged_views = self
            .views
            .purge_expired_at(now)
            .await
            .unwrap_or_else(|err| {
                tracing::warn!("failed to purge expired view state: {}", err);
                0
            });
        HousekeepingReport {
            pruned_tasks,
            purged_results,
            purged_views,
        }
    }

    pub async fn start(&self, surface: &SurfaceKind, request: OperationRequest) -> TaskHandle {
        self.runner.start(surface, request).await
    }

    /// Receive a task's outcome through its handle and mark it consumed, so
    /// reconciliation does not hand it out a second time.
    pub async fn await_outcome(&self, handle: TaskHandle) -> TaskOutcome {
        let task_id = handle.id().clone();
        let outcome = handle.outcome().await;
        self.reconciler.acknowledge(&task_id).await;
        outcome
    }

    pub async fn reconcile(&self, surface: &SurfaceKind) -> ReconcileOutcome {
        self.reconciler.reconcile(surface).await
    }

    pub async fn save_view(&self, surface: &SurfaceKind, state: &ViewState) -> StoreResult<()> {
        self.views.save(surface, state).await
    }

    pub async fn clear_view(&self, surface: &SurfaceKind) -> StoreResult<bool> {
        self.views.clear(surface).await
    }

    pub fn config(&self) -> &TaskRuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &SharedTaskRegistry {
        &self.registry
    }

    pub fn results(&self) -> &Arc<ResultStore> {
        &self.results
    }

    pub fn views(&self) -> &Arc<ViewStateStore> {
        &self.views
    }

    pub fn index(&self) -> &Arc<TaskViewIndex> {
        &self.index
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn startup_report(&self) -> &StartupReport {
        &self.startup
    }
}
