//! Byte storage for stowage stores.
//!
//! This crate provides:
//! - The [`StoreBackend`] contract: streaming reads, atomic streaming writes, delete
//! - Backends: local filesystem and S3-compatible

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, s3::S3Backend};
pub use error::{StorageError, StorageResult};
pub use traits::{ByteStream, StoreBackend, StreamingUpload, count_bytes};

use std::sync::Arc;
use stowage_core::config::StorageConfig;

/// Create a store backend from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn StoreBackend>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => {
            let backend = S3Backend::new(
                bucket,
                endpoint.clone(),
                region.clone(),
                prefix.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
            )
            .await?;
            Ok(Arc::new(backend))
        }
    }
}
