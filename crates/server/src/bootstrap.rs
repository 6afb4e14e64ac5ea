//! Building the store registry and application state from configuration.

use crate::registry::StoreRegistry;
use crate::staging::StagingArea;
use crate::state::AppState;
use crate::store::Store;
use anyhow::{Context, Result};
use std::sync::Arc;
use stowage_core::config::AppConfig;
use stowage_core::{Filter, StorePermissions};
use stowage_metadata::MetadataStore;

/// Build every configured store, in order, with its backend and policy.
///
/// Backends are health-checked before the store is registered so that a
/// misconfigured bucket or directory fails startup instead of the first upload.
pub async fn build_registry(
    config: &AppConfig,
    metadata: Arc<dyn MetadataStore>,
    staging: Arc<StagingArea>,
) -> Result<StoreRegistry> {
    let mut builder = StoreRegistry::builder();

    for store_config in &config.stores {
        let name = &store_config.name;
        let backend = stowage_storage::from_config(&store_config.storage)
            .await
            .with_context(|| format!("failed to initialize storage for store {name:?}"))?;
        backend
            .health_check()
            .await
            .with_context(|| format!("storage health check failed for store {name:?}"))?;

        let mut store = Store::new(name.clone(), backend, metadata.clone())
            .with_filter(
                store_config
                    .filter
                    .clone()
                    .map(Filter::new)
                    .unwrap_or_default(),
            )
            .with_permissions(StorePermissions::from_config(&store_config.permissions))
            .with_urls(&config.server.root_url, &config.server.stores_path)
            .with_write_delay(config.server.simulate_write_delay())
            .with_staging(staging.clone());

        for target in &store_config.copy_to {
            store = store.with_copy_to(builder.copy_target(name, target)?);
        }

        builder.register(store)?;
        tracing::info!(store = %name, copy_to = ?store_config.copy_to, "Store registered");
    }

    Ok(builder.build())
}

/// Open the staging area and metadata store and build the full state.
pub async fn build_state(config: AppConfig) -> Result<AppState> {
    config.validate().context("invalid configuration")?;

    let staging = Arc::new(
        StagingArea::new(&config.server.tmp_dir)
            .await
            .with_context(|| {
                format!(
                    "failed to create staging directory {}",
                    config.server.tmp_dir.display()
                )
            })?,
    );

    let metadata = stowage_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    let registry = build_registry(&config, metadata.clone(), staging.clone()).await?;
    if registry.is_empty() {
        tracing::warn!("No stores configured; every store request will return 404");
    }

    Ok(AppState::new(config, registry, metadata, staging))
}
