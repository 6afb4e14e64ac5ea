//! Persistence for file records and upload tokens.
//!
//! This crate provides:
//! - File records keyed by id, including copy links between stores
//! - One upload token per file
//! - A SQLite implementation with an inline schema

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::FileCompletion;
pub use repos::{FileRepo, TokenRepo};
pub use store::{MetadataStore, SqliteStore};

use std::sync::Arc;
use stowage_core::config::MetadataConfig;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *query_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
