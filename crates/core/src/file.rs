//! File records and the client-facing descriptor used to create them.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for a stored file.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(Uuid);

impl FileId {
    /// Generate a new random file ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidFileId(format!("{s}: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for FileId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lower-cased text after the last dot of a file name.
///
/// Returns `None` when the name has no dot or ends with one.
pub fn extension_of(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

/// What a client declares about a file before uploading it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub name: String,
    /// Owning store. Routes that carry the store name ignore this field.
    #[serde(default)]
    pub store: Option<String>,
    #[serde(default, rename = "type")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Accepted for compatibility and recomputed from `name`.
    #[serde(default)]
    pub extension: Option<String>,
}

impl FileDescriptor {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            ..Default::default()
        }
    }

    pub fn with_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// A stored or in-progress file.
///
/// While `uploading` is true, `complete` is false. `path` and `url` are only
/// populated once the file is complete, and `size` then reflects the bytes the
/// backend actually holds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub store: String,
    pub name: String,
    pub extension: Option<String>,
    #[serde(rename = "type")]
    pub content_type: Option<String>,
    pub size: u64,
    pub user_id: Option<String>,
    pub complete: bool,
    pub uploading: bool,
    pub progress: f64,
    pub token: Option<String>,
    pub etag: Option<String>,
    pub path: Option<String>,
    pub url: Option<String>,
    pub original_store: Option<String>,
    pub original_id: Option<FileId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub uploaded_at: Option<OffsetDateTime>,
}

impl FileRecord {
    /// Build a fresh, not yet uploaded record for `store` from a descriptor.
    pub fn from_descriptor(store: &str, descriptor: &FileDescriptor) -> Self {
        Self {
            id: FileId::new(),
            store: store.to_string(),
            name: descriptor.name.clone(),
            extension: extension_of(&descriptor.name),
            content_type: descriptor.content_type.clone(),
            size: descriptor.size,
            user_id: descriptor.user_id.clone(),
            complete: false,
            uploading: true,
            progress: 0.0,
            token: None,
            etag: None,
            path: None,
            url: None,
            original_store: None,
            original_id: None,
            created_at: OffsetDateTime::now_utc(),
            uploaded_at: None,
        }
    }

    /// Whether this record shadows a file that lives in another store.
    pub fn is_copy(&self) -> bool {
        self.original_id.is_some()
    }
}

/// Partial update applied while a file is being uploaded.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FileUpdate {
    pub progress: Option<f64>,
    pub uploading: Option<bool>,
}
