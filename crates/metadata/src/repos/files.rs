//! File record repository.

use crate::error::MetadataResult;
use crate::models::FileCompletion;
use async_trait::async_trait;
use stowage_core::{FileId, FileRecord, FileUpdate};

/// Repository for file records.
#[async_trait]
pub trait FileRepo: Send + Sync {
    /// Insert a new record. Fails with `AlreadyExists` on id collision.
    async fn insert_file(&self, file: &FileRecord) -> MetadataResult<()>;

    /// Get a record by id.
    async fn get_file(&self, id: FileId) -> MetadataResult<Option<FileRecord>>;

    /// Apply an in-progress update. Fails with `NotFound` for unknown ids.
    async fn update_file(&self, id: FileId, update: FileUpdate) -> MetadataResult<()>;

    /// Store the current token on the record.
    async fn set_file_token(&self, id: FileId, token: &str) -> MetadataResult<()>;

    /// Mark a file complete.
    ///
    /// Only applies while the record is still incomplete; returns `false`
    /// when the record is missing or was already finalized.
    async fn finalize_file(&self, id: FileId, completion: &FileCompletion)
    -> MetadataResult<bool>;

    /// Delete a record and its tokens. Returns whether a record existed.
    async fn delete_file(&self, id: FileId) -> MetadataResult<bool>;

    /// Copy records in `store` that shadow `original_id`.
    async fn list_copies(&self, store: &str, original_id: FileId)
    -> MetadataResult<Vec<FileRecord>>;

    /// All records of a store, newest first.
    async fn list_files(&self, store: &str) -> MetadataResult<Vec<FileRecord>>;
}
