// SQLite key-value backend
// One table, keyed by (namespace, key), in WAL mode so a write is on disk
// before the call returns.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::{StoreError, StoreResult};
use crate::kv::{validate_key, KvStore};

pub struct SqliteKvStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SqliteKvStore {
    /// Open (or create) the store at `db_path`.
    pub async fn open(db_path: &Path) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(StoreError::Io)?;
        }

        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(10))?;

        // PRAGMA journal_mode returns a row
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute("PRAGMA synchronous = NORMAL", [])?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv_entries (
                namespace   TEXT NOT NULL,
                key         TEXT NOT NULL,
                value       TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            );",
        )?;

        tracing::debug!(path = %db_path.display(), "opened kv store");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Entry count per namespace, for startup diagnostics.
    pub async fn namespace_counts(&self) -> StoreResult<Vec<(String, u64)>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT namespace, COUNT(*) FROM kv_entries GROUP BY namespace ORDER BY namespace",
        )?;
        let rows = stmt.query_map([], |row| {
            let count: i64 = row.get(1)?;
            Ok((row.get::<_, String>(0)?, count))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (namespace, count) = row?;
            #[allow(clippy::cast_sign_loss)]
            out.push((namespace, count.max(0) as u64));
        }
        Ok(out)
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<String>> {
        validate_key(namespace, key)?;
        let conn = self.conn.lock().await;
        let value = conn
            .query_row(
                "SELECT value FROM kv_entries WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    async fn put(&self, namespace: &str, key: &str, value: &str) -> StoreResult<()> {
        validate_key(namespace, key)?;
        let conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT OR REPLACE INTO kv_entries (namespace, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![namespace, key, value, now],
        )?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> StoreResult<bool> {
        validate_key(namespace, key)?;
        let conn = self.conn.lock().await;
        let affected = conn.execute(
            "DELETE FROM kv_entries WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
        )?;
        Ok(affected > 0)
    }

    async fn list(&self, namespace: &str) -> StoreResult<Vec<(String, String)>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT key, value FROM kv_entries WHERE namespace = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![namespace], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let entries = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
