//! Configuration types shared across crates.

use crate::filter::FilterConfig;
use crate::permissions::PermissionsConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Absolute URL clients use to reach this server. File URLs are built on it.
    #[serde(default = "default_root_url")]
    pub root_url: String,
    /// Path segment under which stores are served.
    #[serde(default = "default_stores_path")]
    pub stores_path: String,
    /// Directory holding partially uploaded files.
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,
    /// Largest chunk body accepted in one request.
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,
    /// Artificial delay before serving a file, in milliseconds (0 = off).
    #[serde(default)]
    pub simulate_read_delay_ms: u64,
    /// Artificial delay before finalizing a write, in milliseconds (0 = off).
    #[serde(default)]
    pub simulate_write_delay_ms: u64,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_root_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_stores_path() -> String {
    "ufs".to_string()
}

fn default_tmp_dir() -> PathBuf {
    PathBuf::from("/tmp/ufs")
}

fn default_max_chunk_bytes() -> usize {
    crate::MAX_CHUNK_BYTES
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            root_url: default_root_url(),
            stores_path: default_stores_path(),
            tmp_dir: default_tmp_dir(),
            max_chunk_bytes: default_max_chunk_bytes(),
            simulate_read_delay_ms: 0,
            simulate_write_delay_ms: 0,
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    pub fn simulate_read_delay(&self) -> Option<Duration> {
        (self.simulate_read_delay_ms > 0).then(|| Duration::from_millis(self.simulate_read_delay_ms))
    }

    pub fn simulate_write_delay(&self) -> Option<Duration> {
        (self.simulate_write_delay_ms > 0)
            .then(|| Duration::from_millis(self.simulate_write_delay_ms))
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to the ambient credential chain if not set.
        access_key_id: Option<String>,
        /// AWS secret access key.
        secret_access_key: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key`). Required for MinIO.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.is_empty() {
                    return Err("s3 config requires a bucket".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds (advisory only: slow queries are logged, not cancelled).
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(600)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

/// One named store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Unique store name, used in URLs.
    pub name: String,
    /// Where the store keeps file contents.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Admission rules. No filter accepts every non-empty file.
    #[serde(default)]
    pub filter: Option<FilterConfig>,
    #[serde(default)]
    pub permissions: PermissionsConfig,
    /// Stores that receive a copy of every completed file.
    #[serde(default)]
    pub copy_to: Vec<String>,
}

impl StoreConfig {
    pub fn new(name: impl Into<String>, storage: StorageConfig) -> Self {
        Self {
            name: name.into(),
            storage,
            filter: None,
            permissions: PermissionsConfig::default(),
            copy_to: Vec::new(),
        }
    }
}

/// Top-level application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub stores: Vec<StoreConfig>,
}

impl AppConfig {
    /// Create a test configuration with a single filesystem store named `files`.
    ///
    /// **For testing only.** Paths are relative to the working directory.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            metadata: MetadataConfig::default(),
            stores: vec![StoreConfig::new("files", StorageConfig::default())],
        }
    }

    /// Check cross-field invariants that serde cannot express.
    pub fn validate(&self) -> crate::Result<()> {
        let mut seen = HashSet::new();
        for store in &self.stores {
            if store.name.is_empty() || store.name.contains('/') {
                return Err(crate::Error::InvalidConfig(format!(
                    "invalid store name {:?}",
                    store.name
                )));
            }
            if !seen.insert(store.name.as_str()) {
                return Err(crate::Error::InvalidConfig(format!(
                    "store {:?} is defined twice",
                    store.name
                )));
            }
            store.storage.validate().map_err(crate::Error::InvalidConfig)?;
        }
        if self.server.stores_path.trim_matches('/').is_empty() {
            return Err(crate::Error::InvalidConfig(
                "server.stores_path must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
