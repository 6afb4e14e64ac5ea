//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use stowage_core::{FileId, FileRecord};
use time::OffsetDateTime;
use uuid::Uuid;

/// File record as stored in the `files` table.
#[derive(Debug, Clone, FromRow)]
pub struct FileRow {
    pub id: Uuid,
    pub store: String,
    pub name: String,
    pub extension: Option<String>,
    pub content_type: Option<String>,
    pub size: i64,
    pub user_id: Option<String>,
    pub complete: bool,
    pub uploading: bool,
    pub progress: f64,
    pub token: Option<String>,
    pub etag: Option<String>,
    pub path: Option<String>,
    pub url: Option<String>,
    pub original_store: Option<String>,
    pub original_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
    pub uploaded_at: Option<OffsetDateTime>,
}

impl From<&FileRecord> for FileRow {
    fn from(record: &FileRecord) -> Self {
        Self {
            id: *record.id.as_uuid(),
            store: record.store.clone(),
            name: record.name.clone(),
            extension: record.extension.clone(),
            content_type: record.content_type.clone(),
            size: size_to_db(record.size),
            user_id: record.user_id.clone(),
            complete: record.complete,
            uploading: record.uploading,
            progress: record.progress,
            token: record.token.clone(),
            etag: record.etag.clone(),
            path: record.path.clone(),
            url: record.url.clone(),
            original_store: record.original_store.clone(),
            original_id: record.original_id.map(|id| *id.as_uuid()),
            created_at: record.created_at,
            uploaded_at: record.uploaded_at,
        }
    }
}

impl From<FileRow> for FileRecord {
    fn from(row: FileRow) -> Self {
        Self {
            id: FileId::from(row.id),
            store: row.store,
            name: row.name,
            extension: row.extension,
            content_type: row.content_type,
            size: u64::try_from(row.size).unwrap_or(0),
            user_id: row.user_id,
            complete: row.complete,
            uploading: row.uploading,
            progress: row.progress,
            token: row.token,
            etag: row.etag,
            path: row.path,
            url: row.url,
            original_store: row.original_store,
            original_id: row.original_id.map(FileId::from),
            created_at: row.created_at,
            uploaded_at: row.uploaded_at,
        }
    }
}

/// Fields written when an upload is finalized.
#[derive(Debug, Clone)]
pub struct FileCompletion {
    pub size: u64,
    pub token: String,
    pub etag: String,
    pub path: String,
    pub url: String,
    pub uploaded_at: OffsetDateTime,
}

/// Saturate at i64::MAX; SQLite integers are signed.
pub(crate) fn size_to_db(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}
