//! Name-to-store lookup, built once at startup.

use crate::store::Store;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry construction errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("store {0:?} is already registered")]
    DuplicateStore(String),

    #[error("store {store:?} copies to unknown store {target:?}")]
    UnknownCopyTarget { store: String, target: String },
}

/// Immutable set of named stores.
#[derive(Debug, Default)]
pub struct StoreRegistry {
    stores: HashMap<String, Arc<Store>>,
    order: Vec<String>,
}

impl StoreRegistry {
    pub fn builder() -> StoreRegistryBuilder {
        StoreRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Store>> {
        self.stores.get(name).cloned()
    }

    /// Store names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Registers stores in order.
///
/// A store can only copy to stores registered before it, which keeps the
/// copy graph acyclic.
#[derive(Debug, Default)]
pub struct StoreRegistryBuilder {
    registry: StoreRegistry,
}

impl StoreRegistryBuilder {
    /// Look up an already registered store, e.g. to use it as a copy target.
    pub fn get(&self, name: &str) -> Option<Arc<Store>> {
        self.registry.get(name)
    }

    /// Resolve the copy target `target` for the store named `store`.
    pub fn copy_target(&self, store: &str, target: &str) -> Result<Arc<Store>, RegistryError> {
        self.get(target)
            .ok_or_else(|| RegistryError::UnknownCopyTarget {
                store: store.to_string(),
                target: target.to_string(),
            })
    }

    pub fn register(&mut self, store: Store) -> Result<Arc<Store>, RegistryError> {
        let name = store.name().to_string();
        if self.registry.stores.contains_key(&name) {
            return Err(RegistryError::DuplicateStore(name));
        }
        let store = Arc::new(store);
        self.registry.stores.insert(name.clone(), store.clone());
        self.registry.order.push(name);
        Ok(store)
    }

    pub fn build(self) -> StoreRegistry {
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_metadata::{MetadataStore, SqliteStore};
    use stowage_storage::FilesystemBackend;

    async fn store(dir: &std::path::Path, metadata: &Arc<dyn MetadataStore>, name: &str) -> Store {
        let backend = FilesystemBackend::new(dir.join(name)).await.unwrap();
        Store::new(name, Arc::new(backend), metadata.clone())
    }

    #[tokio::test]
    async fn registers_in_order_and_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let metadata: Arc<dyn MetadataStore> =
            Arc::new(SqliteStore::new(dir.path().join("meta.db"), None).await.unwrap());

        let mut builder = StoreRegistry::builder();
        builder.register(store(dir.path(), &metadata, "thumbs").await).unwrap();

        let target = builder.copy_target("photos", "thumbs").unwrap();
        let photos = store(dir.path(), &metadata, "photos").await.with_copy_to(target);
        builder.register(photos).unwrap();

        assert!(matches!(
            builder.register(store(dir.path(), &metadata, "photos").await),
            Err(RegistryError::DuplicateStore(name)) if name == "photos"
        ));
        assert!(matches!(
            builder.copy_target("avatars", "missing"),
            Err(RegistryError::UnknownCopyTarget { .. })
        ));

        let registry = builder.build();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["thumbs", "photos"]);
        assert_eq!(registry.len(), 2);
        let photos = registry.get("photos").unwrap();
        assert_eq!(photos.copy_targets()[0].name(), "thumbs");
        assert!(registry.get("nope").is_none());
    }
}
