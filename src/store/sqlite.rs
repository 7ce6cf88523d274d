//! SQLite-backed checkpoint store.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use sqlx::SqliteConnection;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::CheckpointStore;
use crate::types::{Record, RecordStatus, TaskId};

/// Meta key under which the input fingerprint is stored.
const FINGERPRINT_KEY: &str = "input_fingerprint";

/// Durable checkpoint store backed by a SQLite database file.
///
/// The database file (and its parent directory) is created on first open,
/// and the connection runs in WAL journal mode so flushes from the engine
/// do not block readers inspecting the file. Records are keyed by task id;
/// saving an id again replaces the earlier row.
#[derive(Debug)]
pub struct SqliteStore {
    path: PathBuf,
    pool: RwLock<Option<SqlitePool>>,
}

impl SqliteStore {
    /// Create a store for the database at `path`.
    ///
    /// Nothing touches the filesystem until [`CheckpointStore::open`] runs.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pool: RwLock::new(None),
        }
    }

    /// Path of the underlying database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records currently saved, including ones from earlier runs.
    pub async fn record_count(&self) -> Result<u64, StoreError> {
        let pool = self.pool().await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Failed to count records: {}", e)))?;
        Ok(count as u64)
    }

    /// Fetch a single saved record by id.
    pub async fn get_record(&self, id: TaskId) -> Result<Option<Record>, StoreError> {
        let pool = self.pool().await?;
        let row: Option<(i32, String)> =
            sqlx::query_as("SELECT status, fields FROM records WHERE task_id = ?")
                .bind(id)
                .fetch_optional(&pool)
                .await
                .map_err(|e| StoreError::QueryFailed(format!("Failed to load record: {}", e)))?;

        match row {
            Some((status, fields)) => Ok(Some(Record {
                id,
                status: RecordStatus::from_i32(status),
                fields: serde_json::from_str(&fields)?,
            })),
            None => Ok(None),
        }
    }

    async fn pool(&self) -> Result<SqlitePool, StoreError> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| StoreError::ConnectionFailed("store is not open".to_string()))
    }

    async fn connect(path: &Path) -> Result<SqlitePool, StoreError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StoreError::ConnectionFailed(format!(
                    "Failed to create checkpoint directory: {}",
                    e
                ))
            })?;
        }

        // Connect with foreign key enforcement and WAL mode
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| StoreError::ConnectionFailed(format!("Invalid database path: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        SqlitePool::connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionFailed(format!("Failed to connect: {}", e)))
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
        let mut conn = pool.acquire().await.map_err(|e| {
            StoreError::MigrationFailed(format!("Failed to acquire connection: {}", e))
        })?;

        // Version tracking table
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )",
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            StoreError::MigrationFailed(format!("Failed to create schema_version table: {}", e))
        })?;

        // Check current version
        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    StoreError::MigrationFailed(format!("Failed to query schema version: {}", e))
                })?;

        let current_version = current_version.unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&mut conn).await?;
        }

        Ok(())
    }

    /// Initial schema: the `records` checkpoint table and the `meta`
    /// key-value table holding the input fingerprint.
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<(), StoreError> {
        tracing::info!("Applying checkpoint schema migration v1");

        sqlx::query("BEGIN").execute(&mut *conn).await.map_err(|e| {
            StoreError::MigrationFailed(format!("Failed to begin transaction: {}", e))
        })?;

        let result = async {
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS records (
                    task_id INTEGER PRIMARY KEY,
                    status INTEGER NOT NULL,
                    fields TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                )",
            )
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                StoreError::MigrationFailed(format!("Failed to create records table: {}", e))
            })?;

            sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_status ON records(status)")
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    StoreError::MigrationFailed(format!("Failed to create records index: {}", e))
                })?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS meta (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                )",
            )
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                StoreError::MigrationFailed(format!("Failed to create meta table: {}", e))
            })?;

            Self::record_migration(conn, 1).await?;
            Ok::<(), StoreError>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT").execute(&mut *conn).await.map_err(|e| {
                    StoreError::MigrationFailed(format!("Failed to commit migration: {}", e))
                })?;
                tracing::info!("Checkpoint schema migration v1 complete");
                Ok(())
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn record_migration(conn: &mut SqliteConnection, version: i64) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                StoreError::MigrationFailed(format!("Failed to record migration: {}", e))
            })?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn open(&self) -> Result<(), StoreError> {
        let mut guard = self.pool.write().await;
        if guard.is_some() {
            return Ok(());
        }

        let pool = Self::connect(&self.path).await?;
        if let Err(e) = Self::run_migrations(&pool).await {
            pool.close().await;
            return Err(e);
        }

        tracing::debug!(path = %self.path.display(), "Checkpoint store open");
        *guard = Some(pool);
        Ok(())
    }

    async fn get_processed_items(&self) -> Result<HashSet<TaskId>, StoreError> {
        let pool = self.pool().await?;
        let ids: Vec<TaskId> = sqlx::query_scalar("SELECT task_id FROM records")
            .fetch_all(&pool)
            .await
            .map_err(|e| {
                StoreError::QueryFailed(format!("Failed to load processed ids: {}", e))
            })?;
        Ok(ids.into_iter().collect())
    }

    async fn save_items(&self, records: &[Record]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let pool = self.pool().await?;
        let mut conn = pool.acquire().await.map_err(|e| {
            StoreError::QueryFailed(format!("Failed to acquire connection: {}", e))
        })?;

        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Failed to begin batch: {}", e)))?;

        let now = chrono::Utc::now().timestamp();
        let result = async {
            for record in records {
                let fields = serde_json::to_string(&record.fields)?;
                sqlx::query(
                    "INSERT INTO records (task_id, status, fields, updated_at)
                     VALUES (?, ?, ?, ?)
                     ON CONFLICT(task_id) DO UPDATE SET
                         status = excluded.status,
                         fields = excluded.fields,
                         updated_at = excluded.updated_at",
                )
                .bind(record.id)
                .bind(record.status.to_i32())
                .bind(fields)
                .bind(now)
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    StoreError::QueryFailed(format!("Failed to save record: {}", e))
                })?;
            }
            Ok::<(), StoreError>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT").execute(&mut *conn).await.map_err(|e| {
                    StoreError::QueryFailed(format!("Failed to commit batch: {}", e))
                })?;
                Ok(())
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn load_fingerprint(&self) -> Result<Option<String>, StoreError> {
        let pool = self.pool().await?;
        sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
            .bind(FINGERPRINT_KEY)
            .fetch_optional(&pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Failed to load fingerprint: {}", e)))
    }

    async fn store_fingerprint(&self, fingerprint: &str) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        sqlx::query(
            "INSERT INTO meta (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                 value = excluded.value,
                 updated_at = excluded.updated_at",
        )
        .bind(FINGERPRINT_KEY)
        .bind(fingerprint)
        .bind(chrono::Utc::now().timestamp())
        .execute(&pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("Failed to store fingerprint: {}", e)))?;
        Ok(())
    }

    async fn close(&self) {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio_test::{assert_err, assert_ok};

    fn record(id: i64, status: RecordStatus) -> Record {
        Record::new(TaskId::new(id), status)
    }

    #[tokio::test]
    async fn open_creates_file_and_parent_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("checkpoint.db");

        let store = SqliteStore::new(&path);
        assert_ok!(store.open().await);

        assert!(path.exists(), "open should create the database file");
        assert!(
            store.get_processed_items().await.unwrap().is_empty(),
            "fresh store should have no processed ids"
        );
        store.close().await;
    }

    #[tokio::test]
    async fn queries_before_open_fail() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("checkpoint.db"));

        let err = assert_err!(store.get_processed_items().await);
        assert!(
            matches!(err, StoreError::ConnectionFailed(_)),
            "unopened store should report a connection failure, got {:?}",
            err
        );
    }

    #[tokio::test]
    async fn save_and_reload_across_sessions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.db");

        // First session: save three records
        {
            let store = SqliteStore::new(&path);
            store.open().await.unwrap();
            store
                .save_items(&[
                    record(1, RecordStatus::Success),
                    record(2, RecordStatus::NotFound),
                    record(3, RecordStatus::Timeout),
                ])
                .await
                .unwrap();
            store.close().await;
        }

        // Second session: everything is still there
        {
            let store = SqliteStore::new(&path);
            store.open().await.unwrap();

            let ids = store.get_processed_items().await.unwrap();
            assert_eq!(ids.len(), 3);
            assert!(ids.contains(&TaskId::new(1)));
            assert!(ids.contains(&TaskId::new(2)));
            assert!(ids.contains(&TaskId::new(3)));

            let reloaded = store.get_record(TaskId::new(2)).await.unwrap().unwrap();
            assert_eq!(reloaded.status, RecordStatus::NotFound);
            store.close().await;
        }
    }

    #[tokio::test]
    async fn saving_same_id_replaces_record() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("checkpoint.db"));
        store.open().await.unwrap();

        store
            .save_items(&[record(7, RecordStatus::Timeout)])
            .await
            .unwrap();
        store
            .save_items(&[
                record(7, RecordStatus::Success).with_field("title", serde_json::json!("ok"))
            ])
            .await
            .unwrap();

        assert_eq!(
            store.record_count().await.unwrap(),
            1,
            "replacing a record must not add a row"
        );
        let reloaded = store.get_record(TaskId::new(7)).await.unwrap().unwrap();
        assert_eq!(reloaded.status, RecordStatus::Success);
        assert_eq!(reloaded.fields["title"], "ok");
        store.close().await;
    }

    #[tokio::test]
    async fn record_fields_survive_roundtrip() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("checkpoint.db"));
        store.open().await.unwrap();

        let saved = record(42, RecordStatus::Success)
            .with_field("title", serde_json::json!("subject line"))
            .with_field("size", serde_json::json!(1024));
        store.save_items(&[saved.clone()]).await.unwrap();

        let reloaded = store.get_record(TaskId::new(42)).await.unwrap().unwrap();
        assert_eq!(reloaded, saved);
        store.close().await;
    }

    #[tokio::test]
    async fn empty_batch_is_a_noop() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("checkpoint.db"));
        store.open().await.unwrap();

        assert_ok!(store.save_items(&[]).await);
        assert_eq!(store.record_count().await.unwrap(), 0);
        store.close().await;
    }

    #[tokio::test]
    async fn fingerprint_roundtrip_and_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.db");

        {
            let store = SqliteStore::new(&path);
            store.open().await.unwrap();
            assert_eq!(store.load_fingerprint().await.unwrap(), None);

            store.store_fingerprint("abc123").await.unwrap();
            assert_eq!(
                store.load_fingerprint().await.unwrap(),
                Some("abc123".to_string())
            );

            store.store_fingerprint("def456").await.unwrap();
            assert_eq!(
                store.load_fingerprint().await.unwrap(),
                Some("def456".to_string())
            );
            store.close().await;
        }

        // Fingerprint persists across sessions
        {
            let store = SqliteStore::new(&path);
            store.open().await.unwrap();
            assert_eq!(
                store.load_fingerprint().await.unwrap(),
                Some("def456".to_string())
            );
            store.close().await;
        }
    }

    #[tokio::test]
    async fn open_twice_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("checkpoint.db"));

        assert_ok!(store.open().await);
        store
            .save_items(&[record(1, RecordStatus::Success)])
            .await
            .unwrap();
        assert_ok!(store.open().await);

        assert_eq!(store.record_count().await.unwrap(), 1);
        store.close().await;
    }

    #[tokio::test]
    async fn missing_record_is_none() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("checkpoint.db"));
        store.open().await.unwrap();

        assert_eq!(store.get_record(TaskId::new(99)).await.unwrap(), None);
        store.close().await;
    }
}
