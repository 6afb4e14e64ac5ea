//! Server test utilities.

use std::path::Path;
use std::sync::Arc;
use stowage_core::config::{AppConfig, MetadataConfig, ServerConfig, StorageConfig, StoreConfig};
use stowage_metadata::{MetadataStore, SqliteStore};
use stowage_server::bootstrap::build_state;
use stowage_server::staging::StagingArea;
use stowage_server::{AppState, Store, StoreRegistry, create_router};
use stowage_storage::{FilesystemBackend, StoreBackend};
use tempfile::TempDir;

/// Root URL used by every test server.
pub const ROOT_URL: &str = "http://files.test";

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server with one filesystem store named `files`.
    pub async fn new() -> Self {
        Self::with_config(|_, _| {}).await
    }

    /// Create a test server with custom config modifications.
    ///
    /// The modifier receives the temporary directory so extra stores can keep
    /// their bytes inside it.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig, &Path),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let root = temp_dir.path();

        let mut config = AppConfig {
            server: test_server_config(root),
            metadata: MetadataConfig::Sqlite {
                path: root.join("metadata.db"),
                query_timeout_secs: None,
            },
            stores: vec![StoreConfig::new(
                "files",
                StorageConfig::Filesystem {
                    path: root.join("stores").join("files"),
                },
            )],
        };
        modifier(&mut config, root);

        let state = build_state(config)
            .await
            .expect("Failed to build application state");
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Create a test server from stores assembled in code.
    ///
    /// Used for stores carrying transforms, hooks or custom backends, which
    /// configuration cannot express.
    pub async fn with_stores<F>(build: F) -> Self
    where
        F: AsyncFnOnce(&StoreKit) -> Vec<Store>,
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let root = temp_dir.path();
        let server = test_server_config(root);

        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(root.join("metadata.db"), None)
                .await
                .expect("Failed to create metadata store"),
        );
        let staging = Arc::new(
            StagingArea::new(&server.tmp_dir)
                .await
                .expect("Failed to create staging area"),
        );

        let kit = StoreKit {
            root: root.to_path_buf(),
            metadata: metadata.clone(),
            staging: staging.clone(),
            server: server.clone(),
        };

        let mut builder = StoreRegistry::builder();
        for store in build(&kit).await {
            builder.register(store).expect("Failed to register store");
        }

        let config = AppConfig {
            server,
            metadata: MetadataConfig::Sqlite {
                path: root.join("metadata.db"),
                query_timeout_secs: None,
            },
            stores: Vec::new(),
        };
        let state = AppState::new(config, builder.build(), metadata, staging);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Look up a registered store.
    pub fn store(&self, name: &str) -> Arc<Store> {
        self.state
            .registry
            .get(name)
            .unwrap_or_else(|| panic!("store {name} is not registered"))
    }
}

/// Shared pieces for building stores by hand inside [`TestServer::with_stores`].
#[allow(dead_code)]
pub struct StoreKit {
    root: std::path::PathBuf,
    metadata: Arc<dyn MetadataStore>,
    staging: Arc<StagingArea>,
    server: ServerConfig,
}

#[allow(dead_code)]
impl StoreKit {
    /// A store wired to the shared metadata and staging, with a filesystem
    /// backend under the temp dir.
    pub async fn store(&self, name: &str) -> Store {
        let backend = FilesystemBackend::new(self.root.join("stores").join(name))
            .await
            .expect("Failed to create storage backend");
        self.store_with_backend(name, Arc::new(backend))
    }

    /// A store with a caller-supplied backend.
    pub fn store_with_backend(&self, name: &str, backend: Arc<dyn StoreBackend>) -> Store {
        Store::new(name, backend, self.metadata.clone())
            .with_urls(&self.server.root_url, &self.server.stores_path)
            .with_staging(self.staging.clone())
    }
}

fn test_server_config(root: &Path) -> ServerConfig {
    ServerConfig {
        root_url: ROOT_URL.to_string(),
        tmp_dir: root.join("staging"),
        ..Default::default()
    }
}
