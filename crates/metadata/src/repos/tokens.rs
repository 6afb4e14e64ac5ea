//! Upload token repository.

use crate::error::MetadataResult;
use async_trait::async_trait;
use stowage_core::FileId;

/// Repository for per-file upload tokens.
#[async_trait]
pub trait TokenRepo: Send + Sync {
    /// Set the token for a file, replacing any previous value.
    async fn upsert_token(&self, file_id: FileId, value: &str) -> MetadataResult<()>;

    /// True when exactly one token row matches both file and value.
    async fn check_token(&self, file_id: FileId, value: &str) -> MetadataResult<bool>;
}
