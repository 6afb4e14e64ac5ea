//! Application state shared across handlers.

use crate::error::{ApiError, ApiResult};
use crate::registry::StoreRegistry;
use crate::staging::StagingArea;
use crate::store::Store;
use std::sync::Arc;
use stowage_core::config::AppConfig;
use stowage_metadata::MetadataStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Named stores.
    pub registry: Arc<StoreRegistry>,
    /// Metadata store shared by every store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Partially uploaded files.
    pub staging: Arc<StagingArea>,
    /// Client for URL imports.
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        registry: StoreRegistry,
        metadata: Arc<dyn MetadataStore>,
        staging: Arc<StagingArea>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("stowaged/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            metadata,
            staging,
            http,
        }
    }

    /// Look up a store by name.
    pub fn store(&self, name: &str) -> ApiResult<Arc<Store>> {
        self.registry
            .get(name)
            .ok_or_else(|| ApiError::NotFound(format!("store {name:?} does not exist")))
    }
}
