use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tokio::fs;

use kinetic_observability::{
    canonical_logs_dir_from_root, init_process_logging, LoggingInitInfo, ProcessKind, WorkerGuard,
};

use crate::registry::ReaperPolicy;

const DATABASE_FILE: &str = "tasks.sqlite";
// keeps chrono::Duration::seconds far from its overflow panic
const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;
const MAX_LOG_RETENTION_DAYS: u64 = 10 * 365;

/// Runtime knobs for the task layer. Every field has a default so partial
/// JSON files are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskRuntimeConfig {
    pub data_dir: PathBuf,
    pub result_ttl_secs: u64,
    pub view_state_ttl_secs: u64,
    pub max_running_age_secs: u64,
    /// Treat every task found running at startup as interrupted.
    pub fail_all_running_on_startup: bool,
    pub purge_on_startup: bool,
    pub log_retention_days: u64,
}

impl Default for TaskRuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            result_ttl_secs: 7 * 24 * 60 * 60,
            view_state_ttl_secs: 24 * 60 * 60,
            max_running_age_secs: 5 * 60,
            fail_all_running_on_startup: true,
            purge_on_startup: true,
            log_retention_days: 14,
        }
    }
}

impl TaskRuntimeConfig {
    /// Defaults, then the JSON file at `path` if it exists, then `KINETIC_*`
    /// environment variables.
    pub async fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => read_config_file(path).await?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Unparseable values are logged
    /// and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("KINETIC_DATA_DIR") {
            if !dir.trim().is_empty() {
                self.data_dir = PathBuf::from(dir.trim());
            }
        }
        override_secs(&lookup, "KINETIC_RESULT_TTL_SECS", &mut self.result_ttl_secs);
        override_secs(
            &lookup,
            "KINETIC_VIEW_STATE_TTL_SECS",
            &mut self.view_state_ttl_secs,
        );
        override_secs(
            &lookup,
            "KINETIC_MAX_RUNNING_AGE_SECS",
            &mut self.max_running_age_secs,
        );
        override_secs(
            &lookup,
            "KINETIC_LOG_RETENTION_DAYS",
            &mut self.log_retention_days,
        );
        override_bool(
            &lookup,
            "KINETIC_FAIL_ALL_RUNNING_ON_STARTUP",
            &mut self.fail_all_running_on_startup,
        );
        override_bool(&lookup, "KINETIC_PURGE_ON_STARTUP", &mut self.purge_on_startup);
    }

    pub fn result_ttl(&self) -> Duration {
        secs(self.result_ttl_secs)
    }

    pub fn view_state_ttl(&self) -> Duration {
        secs(self.view_state_ttl_secs)
    }

    pub fn max_running_age(&self) -> Duration {
        secs(self.max_running_age_secs)
    }

    pub fn reaper_policy(&self) -> ReaperPolicy {
        if self.fail_all_running_on_startup {
            ReaperPolicy::FailAll
        } else {
            ReaperPolicy::OlderThan(self.max_running_age())
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn logs_dir(&self) -> PathBuf {
        canonical_logs_dir_from_root(&self.data_dir)
    }

    /// Install console and JSONL file logging under [`Self::logs_dir`]. Keep
    /// the guard alive for as long as logs should be flushed.
    pub fn init_logging(
        &self,
        process: ProcessKind,
    ) -> anyhow::Result<(WorkerGuard, LoggingInitInfo)> {
        let logs_dir = self.logs_dir();
        let retention_days = self.log_retention_days.min(MAX_LOG_RETENTION_DAYS);
        init_process_logging(process, &logs_dir, retention_days)
            .with_context(|| format!("failed to initialize logging in {}", logs_dir.display()))
    }
}

/// Platform data directory for Kinetic, `KINETIC_DATA_DIR` aside.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|base| base.join("kinetic"))
        .unwrap_or_else(|| PathBuf::from(".kinetic"))
}

async fn read_config_file(path: &Path) -> anyhow::Result<TaskRuntimeConfig> {
    if !path.exists() {
        return Ok(TaskRuntimeConfig::default());
    }
    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
}

fn secs(value: u64) -> Duration {
    Duration::seconds(value.min(MAX_DURATION_SECS) as i64)
}

fn override_secs(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut u64) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<u64>() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring invalid numeric override"),
    }
}

fn override_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut bool) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match parse_bool_like(&raw) {
        Some(value) => *target = value,
        None => tracing::warn!(key, value = %raw, "ignoring invalid boolean override"),
    }
}

fn parse_bool_like(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_documented_windows() {
        let config = TaskRuntimeConfig::default();
        assert_eq!(config.result_ttl(), Duration::days(7));
        assert_eq!(config.view_state_ttl(), Duration::hours(24));
        assert_eq!(config.max_running_age(), Duration::minutes(5));
        assert_eq!(config.reaper_policy(), ReaperPolicy::FailAll);
        assert!(config.database_path().ends_with("tasks.sqlite"));
    }

    #[test]
    fn overrides_apply_and_invalid_values_are_ignored() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("KINETIC_DATA_DIR", "/tmp/kinetic-test"),
            ("KINETIC_MAX_RUNNING_AGE_SECS", "600"),
            ("KINETIC_RESULT_TTL_SECS", "soon"),
            ("KINETIC_FAIL_ALL_RUNNING_ON_STARTUP", "off"),
        ]);
        let mut config = TaskRuntimeConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.data_dir, PathBuf::from("/tmp/kinetic-test"));
        assert_eq!(config.max_running_age_secs, 600);
        assert_eq!(config.result_ttl_secs, 7 * 24 * 60 * 60);
        assert_eq!(
            config.reaper_policy(),
            ReaperPolicy::OlderThan(Duration::minutes(10))
        );
    }

    #[test]
    fn huge_ttl_is_clamped() {
        let config = TaskRuntimeConfig {
            result_ttl_secs: u64::MAX,
            ..TaskRuntimeConfig::default()
        };
        assert_eq!(config.result_ttl(), Duration::seconds(MAX_DURATION_SECS as i64));
    }

    #[test]
    fn huge_log_retention_is_clamped() {
        let dir = TempDir::new().unwrap();
        let mut config = TaskRuntimeConfig {
            data_dir: dir.path().to_path_buf(),
            ..TaskRuntimeConfig::default()
        };
        config.apply_overrides(|key| {
            (key == "KINETIC_LOG_RETENTION_DAYS").then(|| "200000000000".to_string())
        });
        assert_eq!(config.log_retention_days, 200_000_000_000);

        let (_guard, info) = config.init_logging(ProcessKind::App).unwrap();
        assert_eq!(info.retention_days, MAX_LOG_RETENTION_DAYS);
    }

    #[tokio::test]
    async fn partial_file_keeps_remaining_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        tokio::fs::write(&path, r#"{ "view_state_ttl_secs": 60, "purge_on_startup": false }"#)
            .await
            .unwrap();

        let config = read_config_file(&path).await.unwrap();
        assert_eq!(config.view_state_ttl_secs, 60);
        assert!(!config.purge_on_startup);
        assert_eq!(config.max_running_age_secs, 300);
    }

    #[test]
    fn init_logging_writes_under_data_dir() {
        let dir = TempDir::new().unwrap();
        let config = TaskRuntimeConfig {
            data_dir: dir.path().to_path_buf(),
            ..TaskRuntimeConfig::default()
        };
        let (_guard, info) = config.init_logging(ProcessKind::App).unwrap();
        assert!(dir.path().join("logs").is_dir());
        assert_eq!(info.retention_days, 14);
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = read_config_file(&dir.path().join("absent.json"))
            .await
            .unwrap();
        assert_eq!(config, TaskRuntimeConfig::default());
    }
}
