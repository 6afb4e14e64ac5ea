//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{FileRepo, TokenRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: FileRepo + TokenRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    query_timeout: Duration,
}

impl SqliteStore {
    /// Open (or create) a database file and apply the schema.
    ///
    /// `query_timeout_secs` is advisory: SQLite cannot cancel statements, so
    /// queries running longer are only logged.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // A single connection serializes writers and avoids "database is locked".
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            query_timeout: Duration::from_secs(query_timeout_secs.unwrap_or(600)),
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    fn observe(&self, op: &'static str, started: Instant) {
        let elapsed = started.elapsed();
        if elapsed > self.query_timeout {
            tracing::warn!(
                op,
                elapsed_ms = elapsed.as_millis() as u64,
                timeout_ms = self.query_timeout.as_millis() as u64,
                "metadata query exceeded advisory timeout"
            );
        }
    }
}

impl From<std::io::Error> for MetadataError {
    fn from(e: std::io::Error) -> Self {
        MetadataError::Config(e.to_string())
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::{FileCompletion, FileRow, size_to_db};
    use stowage_core::{FileId, FileRecord, FileUpdate};
    use time::OffsetDateTime;

    #[async_trait]
    impl FileRepo for SqliteStore {
        async fn insert_file(&self, file: &FileRecord) -> MetadataResult<()> {
            let started = Instant::now();
            let row = FileRow::from(file);
            let result = sqlx::query(
                r#"
                INSERT INTO files (
                    id, store, name, extension, content_type, size, user_id,
                    complete, uploading, progress, token, etag, path, url,
                    original_store, original_id, created_at, uploaded_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(row.id)
            .bind(&row.store)
            .bind(&row.name)
            .bind(&row.extension)
            .bind(&row.content_type)
            .bind(row.size)
            .bind(&row.user_id)
            .bind(row.complete)
            .bind(row.uploading)
            .bind(row.progress)
            .bind(&row.token)
            .bind(&row.etag)
            .bind(&row.path)
            .bind(&row.url)
            .bind(&row.original_store)
            .bind(row.original_id)
            .bind(row.created_at)
            .bind(row.uploaded_at)
            .execute(&self.pool)
            .await;
            self.observe("insert_file", started);

            match result {
                Ok(_) => Ok(()),
                Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(
                    MetadataError::AlreadyExists(format!("file {} already exists", file.id)),
                ),
                Err(e) => Err(e.into()),
            }
        }

        async fn get_file(&self, id: FileId) -> MetadataResult<Option<FileRecord>> {
            let started = Instant::now();
            let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE id = ?")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
            self.observe("get_file", started);
            Ok(row.map(FileRecord::from))
        }

        async fn update_file(&self, id: FileId, update: FileUpdate) -> MetadataResult<()> {
            let started = Instant::now();
            let result = sqlx::query(
                r#"
                UPDATE files
                SET progress = COALESCE(?, progress),
                    uploading = COALESCE(?, uploading)
                WHERE id = ?
                "#,
            )
            .bind(update.progress)
            .bind(update.uploading)
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
            self.observe("update_file", started);

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("file {id} not found")));
            }
            Ok(())
        }

        async fn set_file_token(&self, id: FileId, token: &str) -> MetadataResult<()> {
            let result = sqlx::query("UPDATE files SET token = ? WHERE id = ?")
                .bind(token)
                .bind(id.as_uuid())
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("file {id} not found")));
            }
            Ok(())
        }

        async fn finalize_file(
            &self,
            id: FileId,
            completion: &FileCompletion,
        ) -> MetadataResult<bool> {
            let started = Instant::now();
            let result = sqlx::query(
                r#"
                UPDATE files
                SET complete = 1, uploading = 0, progress = 1,
                    size = ?, token = ?, etag = ?, path = ?, url = ?, uploaded_at = ?
                WHERE id = ? AND complete = 0
                "#,
            )
            .bind(size_to_db(completion.size))
            .bind(&completion.token)
            .bind(&completion.etag)
            .bind(&completion.path)
            .bind(&completion.url)
            .bind(completion.uploaded_at)
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
            self.observe("finalize_file", started);
            Ok(result.rows_affected() == 1)
        }

        async fn delete_file(&self, id: FileId) -> MetadataResult<bool> {
            let started = Instant::now();
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM tokens WHERE file_id = ?")
                .bind(id.as_uuid())
                .execute(&mut *tx)
                .await?;
            let result = sqlx::query("DELETE FROM files WHERE id = ?")
                .bind(id.as_uuid())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            self.observe("delete_file", started);
            Ok(result.rows_affected() > 0)
        }

        async fn list_copies(
            &self,
            store: &str,
            original_id: FileId,
        ) -> MetadataResult<Vec<FileRecord>> {
            let rows = sqlx::query_as::<_, FileRow>(
                "SELECT * FROM files WHERE store = ? AND original_id = ? ORDER BY created_at",
            )
            .bind(store)
            .bind(original_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.into_iter().map(FileRecord::from).collect())
        }

        async fn list_files(&self, store: &str) -> MetadataResult<Vec<FileRecord>> {
            let rows = sqlx::query_as::<_, FileRow>(
                "SELECT * FROM files WHERE store = ? ORDER BY created_at DESC",
            )
            .bind(store)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.into_iter().map(FileRecord::from).collect())
        }
    }

    #[async_trait]
    impl TokenRepo for SqliteStore {
        async fn upsert_token(&self, file_id: FileId, value: &str) -> MetadataResult<()> {
            let started = Instant::now();
            sqlx::query(
                r#"
                INSERT INTO tokens (file_id, value, created_at) VALUES (?, ?, ?)
                ON CONFLICT (file_id) DO UPDATE SET value = excluded.value, created_at = excluded.created_at
                "#,
            )
            .bind(file_id.as_uuid())
            .bind(value)
            .bind(OffsetDateTime::now_utc())
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                    MetadataError::NotFound(format!("file {file_id} not found"))
                }
                other => other.into(),
            })?;
            self.observe("upsert_token", started);
            Ok(())
        }

        async fn check_token(&self, file_id: FileId, value: &str) -> MetadataResult<bool> {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM tokens WHERE file_id = ? AND value = ?")
                    .bind(file_id.as_uuid())
                    .bind(value)
                    .fetch_one(&self.pool)
                    .await?;
            Ok(count == 1)
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    id BLOB PRIMARY KEY NOT NULL,
    store TEXT NOT NULL,
    name TEXT NOT NULL,
    extension TEXT,
    content_type TEXT,
    size INTEGER NOT NULL DEFAULT 0,
    user_id TEXT,
    complete BOOLEAN NOT NULL DEFAULT 0,
    uploading BOOLEAN NOT NULL DEFAULT 0,
    progress REAL NOT NULL DEFAULT 0,
    token TEXT,
    etag TEXT,
    path TEXT,
    url TEXT,
    original_store TEXT,
    original_id BLOB,
    created_at TEXT NOT NULL,
    uploaded_at TEXT,
    CHECK (NOT (complete AND uploading))
);

CREATE INDEX IF NOT EXISTS idx_files_store ON files (store, created_at);
CREATE INDEX IF NOT EXISTS idx_files_original ON files (store, original_id)
    WHERE original_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS tokens (
    file_id BLOB PRIMARY KEY NOT NULL REFERENCES files (id) ON DELETE CASCADE,
    value TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;
