//! Named stores: the validation, write, copy and delete pipeline.
//!
//! A [`Store`] couples a byte backend with the shared metadata store and the
//! policy of one store name: filter, permissions, transforms, hooks and the
//! stores that receive a copy of every completed file.

use crate::metrics;
use crate::staging::StagingArea;
use crate::transform::{ReadTransform, WriteTransform};
use axum::http::HeaderMap;
use futures::StreamExt;
use futures::future::join_all;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use stowage_core::{
    FileDescriptor, FileId, FileRecord, FileUpdate, Filter, FilterError, StorePermissions,
    generate_token, new_token,
};
use stowage_metadata::{FileCompletion, MetadataError, MetadataStore};
use stowage_storage::{ByteStream, StorageError, StoreBackend, count_bytes};
use time::OffsetDateTime;

/// Characters left alone by JavaScript's `encodeURI`.
const URI_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b';')
    .remove(b',')
    .remove(b'/')
    .remove(b'?')
    .remove(b':')
    .remove(b'@')
    .remove(b'&')
    .remove(b'=')
    .remove(b'+')
    .remove(b'$')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'#');

/// Template for record etags.
const ETAG_PATTERN: &str = "xxxxxxxxxxxxxxxxx";

/// Store operation errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("operation not permitted")]
    Forbidden,

    #[error("file not found: {0}")]
    NotFound(FileId),

    #[error(transparent)]
    Validation(#[from] FilterError),

    #[error("invalid file: {0}")]
    Invalid(String),

    #[error("file {0} is already complete")]
    AlreadyComplete(FileId),

    #[error("storage backend failure: {0}")]
    Backend(#[from] StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

type Validator = Arc<dyn Fn(&FileRecord) -> Result<(), String> + Send + Sync>;
type FinishHook = Arc<dyn Fn(&FileRecord) + Send + Sync>;
type ReadGuard = Arc<dyn Fn(&FileRecord, &HeaderMap) -> bool + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&FileRecord, &(dyn StdError + 'static)) + Send + Sync>;

#[derive(Clone, Default)]
struct Hooks {
    on_validate: Option<Validator>,
    on_finish_upload: Option<FinishHook>,
    on_read: Option<ReadGuard>,
    on_read_error: Option<ErrorHook>,
    on_write_error: Option<ErrorHook>,
    on_copy_error: Option<ErrorHook>,
}

/// A named store.
pub struct Store {
    name: String,
    backend: Arc<dyn StoreBackend>,
    metadata: Arc<dyn MetadataStore>,
    filter: Filter,
    permissions: StorePermissions,
    copy_to: Vec<Arc<Store>>,
    read_transform: Option<Arc<dyn ReadTransform>>,
    write_transform: Option<Arc<dyn WriteTransform>>,
    hooks: Hooks,
    root_url: String,
    stores_path: String,
    write_delay: Option<Duration>,
    staging: Option<Arc<StagingArea>>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.name)
            .field("backend", &self.backend.backend_name())
            .field("filter", &self.filter)
            .field(
                "copy_to",
                &self.copy_to.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Create a store with no filter rules beyond the non-empty default,
    /// permissive permissions and no transforms.
    pub fn new(
        name: impl Into<String>,
        backend: Arc<dyn StoreBackend>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            name: name.into(),
            backend,
            metadata,
            filter: Filter::default(),
            permissions: StorePermissions::allow_all(),
            copy_to: Vec::new(),
            read_transform: None,
            write_transform: None,
            hooks: Hooks::default(),
            root_url: "http://127.0.0.1:8080".to_string(),
            stores_path: "ufs".to_string(),
            write_delay: None,
            staging: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_permissions(mut self, permissions: StorePermissions) -> Self {
        self.permissions = permissions;
        self
    }

    /// Copy every completed file into `target` when its filter accepts it.
    pub fn with_copy_to(mut self, target: Arc<Store>) -> Self {
        self.copy_to.push(target);
        self
    }

    pub fn with_read_transform(mut self, transform: impl ReadTransform) -> Self {
        self.read_transform = Some(Arc::new(transform));
        self
    }

    pub fn with_write_transform(mut self, transform: impl WriteTransform) -> Self {
        self.write_transform = Some(Arc::new(transform));
        self
    }

    /// Extra validation run after the filter on create.
    pub fn with_validator<F>(mut self, validate: F) -> Self
    where
        F: Fn(&FileRecord) -> Result<(), String> + Send + Sync + 'static,
    {
        self.hooks.on_validate = Some(Arc::new(validate));
        self
    }

    pub fn on_finish_upload<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FileRecord) + Send + Sync + 'static,
    {
        self.hooks.on_finish_upload = Some(Arc::new(hook));
        self
    }

    /// Veto for serving a file; returning `false` denies the read.
    pub fn on_read<F>(mut self, guard: F) -> Self
    where
        F: Fn(&FileRecord, &HeaderMap) -> bool + Send + Sync + 'static,
    {
        self.hooks.on_read = Some(Arc::new(guard));
        self
    }

    pub fn on_read_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FileRecord, &(dyn StdError + 'static)) + Send + Sync + 'static,
    {
        self.hooks.on_read_error = Some(Arc::new(hook));
        self
    }

    pub fn on_write_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FileRecord, &(dyn StdError + 'static)) + Send + Sync + 'static,
    {
        self.hooks.on_write_error = Some(Arc::new(hook));
        self
    }

    pub fn on_copy_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FileRecord, &(dyn StdError + 'static)) + Send + Sync + 'static,
    {
        self.hooks.on_copy_error = Some(Arc::new(hook));
        self
    }

    /// Base used for file URLs: `{root_url}/{stores_path}/{name}/...`.
    pub fn with_urls(mut self, root_url: impl Into<String>, stores_path: impl Into<String>) -> Self {
        self.root_url = root_url.into();
        self.stores_path = stores_path.into().trim_matches('/').to_string();
        self
    }

    /// Artificial delay between the backend write and finalization.
    pub fn with_write_delay(mut self, delay: Option<Duration>) -> Self {
        self.write_delay = delay;
        self
    }

    /// Staging area whose files are cleaned up on delete.
    pub fn with_staging(mut self, staging: Arc<StagingArea>) -> Self {
        self.staging = Some(staging);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    pub fn copy_targets(&self) -> &[Arc<Store>] {
        &self.copy_to
    }

    /// Load a record of this store.
    pub async fn get(&self, id: FileId) -> StoreResult<Option<FileRecord>> {
        let file = self.metadata.get_file(id).await?;
        Ok(file.filter(|f| f.store == self.name))
    }

    async fn require(&self, id: FileId) -> StoreResult<FileRecord> {
        self.get(id).await?.ok_or(StoreError::NotFound(id))
    }

    /// Validate a descriptor and insert a new, not yet uploaded record.
    #[tracing::instrument(skip(self, descriptor), fields(store = %self.name))]
    pub async fn create(
        &self,
        descriptor: &FileDescriptor,
        actor: Option<&str>,
    ) -> StoreResult<FileRecord> {
        let file = FileRecord::from_descriptor(&self.name, descriptor);

        if !self.permissions.check_insert(actor, &file) {
            return Err(StoreError::Forbidden);
        }
        self.filter.check(&file)?;
        if let Some(validate) = &self.hooks.on_validate {
            validate(&file).map_err(StoreError::Invalid)?;
        }

        self.metadata.insert_file(&file).await?;
        metrics::FILES_CREATED.inc();
        tracing::debug!(file_id = %file.id, name = %file.name, "File record created");
        Ok(file)
    }

    /// Issue the upload token of a file, replacing any previous one.
    pub async fn create_token(&self, id: FileId) -> StoreResult<String> {
        let token = new_token();
        self.metadata.upsert_token(id, &token).await?;
        self.metadata.set_file_token(id, &token).await?;
        Ok(token)
    }

    /// Whether `token` is the current upload token of `id`.
    pub async fn check_token(&self, token: &str, id: FileId) -> StoreResult<bool> {
        Ok(self.metadata.check_token(id, token).await?)
    }

    /// Apply an update on behalf of `actor`, subject to the update permission.
    pub async fn update(
        &self,
        id: FileId,
        actor: Option<&str>,
        update: FileUpdate,
    ) -> StoreResult<()> {
        let file = self.require(id).await?;
        if !self.permissions.check_update(actor, &file) {
            return Err(StoreError::Forbidden);
        }
        self.apply_update(&file, update).await
    }

    /// Record transfer progress for a token-authorized chunk.
    pub async fn record_progress(&self, id: FileId, progress: Option<f64>) -> StoreResult<()> {
        let file = self.require(id).await?;
        let update = FileUpdate {
            progress: progress.map(|p| p.min(1.0)),
            uploading: Some(true),
        };
        self.apply_update(&file, update).await
    }

    async fn apply_update(&self, file: &FileRecord, update: FileUpdate) -> StoreResult<()> {
        if file.complete && update.uploading == Some(true) {
            return Err(StoreError::AlreadyComplete(file.id));
        }
        self.metadata.update_file(file.id, update).await?;
        Ok(())
    }

    /// Identity unless a write transform is installed.
    pub fn transform_write(&self, input: ByteStream, file: &FileRecord) -> ByteStream {
        match &self.write_transform {
            Some(transform) => transform.transform(input, file),
            None => input,
        }
    }

    /// Identity unless a read transform is installed.
    pub fn transform_read(
        &self,
        input: ByteStream,
        file: &FileRecord,
        headers: &mut HeaderMap,
    ) -> ByteStream {
        match &self.read_transform {
            Some(transform) => transform.transform(input, file, headers),
            None => input,
        }
    }

    /// Whether the read guard lets `headers`' sender read `file`.
    pub fn allows_read(&self, file: &FileRecord, headers: &HeaderMap) -> bool {
        self.hooks
            .on_read
            .as_ref()
            .is_none_or(|guard| guard(file, headers))
    }

    /// Open a complete file for serving.
    ///
    /// Errors from the backend, at open time or mid-stream, go through the
    /// read error hook. The returned stream has the read transform applied.
    pub async fn read(&self, file: &FileRecord, headers: &mut HeaderMap) -> StoreResult<ByteStream> {
        let source = match self.backend.read_stream(&file.id.to_string()).await {
            Ok(stream) => stream,
            Err(e) => {
                report_read_error(&self.name, self.hooks.on_read_error.as_ref(), file, &e);
                return Err(StoreError::Backend(e));
            }
        };

        let name = self.name.clone();
        let hook = self.hooks.on_read_error.clone();
        let record = file.clone();
        let source: ByteStream = Box::pin(source.inspect(move |chunk| {
            if let Err(e) = chunk {
                report_read_error(&name, hook.as_ref(), &record, e);
            }
        }));

        Ok(self.transform_read(source, file, headers))
    }

    /// Stream a file's bytes into the backend and finalize its record.
    ///
    /// On a source or backend error the partial object is aborted, the
    /// record and its token are removed, and the write error hook runs. On
    /// success the record is marked complete exactly once, then copies are
    /// propagated to every target store that accepts the file.
    #[tracing::instrument(skip(self, source), fields(store = %self.name, file_id = %id))]
    pub async fn write(&self, source: ByteStream, id: FileId) -> StoreResult<FileRecord> {
        let file = self.require(id).await?;
        if file.complete {
            return Err(StoreError::AlreadyComplete(id));
        }
        let key = id.to_string();

        let size = match self.write_backend(&key, source, &file).await {
            Ok(size) => size,
            Err(e) => {
                self.fail_write(&file, &e).await;
                return Err(StoreError::Backend(e));
            }
        };

        let completion = FileCompletion {
            size,
            token: new_token(),
            etag: generate_token(ETAG_PATTERN),
            path: self.file_relative_url(&file),
            url: self.file_url(&file),
            uploaded_at: OffsetDateTime::now_utc(),
        };
        if !self.metadata.finalize_file(id, &completion).await? {
            return Err(StoreError::AlreadyComplete(id));
        }
        let record = self.require(id).await?;
        metrics::UPLOADS_COMPLETED.inc();
        tracing::info!(size = record.size, "File stored");

        if let Some(hook) = &self.hooks.on_finish_upload {
            hook(&record);
        }

        self.propagate_copies(&record).await;
        Ok(record)
    }

    /// Write through the sink and return the authoritative stored size.
    async fn write_backend(
        &self,
        key: &str,
        source: ByteStream,
        file: &FileRecord,
    ) -> Result<u64, StorageError> {
        let mut sink = self.backend.write_stream(key).await?;
        let mut stream = self.transform_write(source, file);

        let mut copied = Ok(());
        while let Some(chunk) = stream.next().await {
            copied = match chunk {
                Ok(data) => sink.write(data).await,
                Err(e) => Err(e),
            };
            if copied.is_err() {
                break;
            }
        }
        drop(stream);

        if let Err(e) = copied {
            if let Err(abort_err) = sink.abort().await {
                tracing::warn!(error = %abort_err, "Failed to abort backend write");
            }
            return Err(e);
        }
        sink.finish().await?;

        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }

        // Transforms may change the length, so the stored object is recounted.
        let recount = match self.backend.read_stream(key).await {
            Ok(stream) => count_bytes(stream).await,
            Err(e) => Err(e),
        };
        match recount {
            Ok(size) => Ok(size),
            Err(e) => {
                if let Err(delete_err) = self.backend.delete(key).await {
                    tracing::warn!(error = %delete_err, "Failed to remove unreadable object");
                }
                Err(e)
            }
        }
    }

    async fn fail_write(&self, file: &FileRecord, err: &StorageError) {
        tracing::error!(
            file_id = %file.id,
            store = %self.name,
            error = %err,
            "Failed to write file to store backend"
        );
        metrics::record_upload_failure("write");
        if let Err(e) = self.metadata.delete_file(file.id).await {
            tracing::warn!(file_id = %file.id, error = %e, "Failed to remove record after write failure");
        }
        if let Some(hook) = &self.hooks.on_write_error {
            hook(file, err);
        }
    }

    async fn propagate_copies(&self, record: &FileRecord) {
        let copies = self
            .copy_to
            .iter()
            .map(|target| self.copy(record.id, target));
        for (target, result) in self.copy_to.iter().zip(join_all(copies).await) {
            match result {
                Ok(Some(copy)) => {
                    tracing::debug!(target = %target.name, copy_id = %copy.id, "File copied");
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(target = %target.name, error = %e, "Copy propagation failed");
                }
            }
        }
    }

    /// Copy a complete file into `target`.
    ///
    /// Returns `Ok(None)` without creating anything when the target's filter
    /// rejects the file, and `Forbidden` when the target's insert permission
    /// does. The copy is a new record in `target` pointing back at the
    /// original through `original_store`/`original_id`.
    #[tracing::instrument(skip(self, target), fields(store = %self.name, target = %target.name, file_id = %id))]
    pub async fn copy(&self, id: FileId, target: &Store) -> StoreResult<Option<FileRecord>> {
        let file = self.require(id).await?;

        let mut shadow = file.clone();
        shadow.id = FileId::new();
        shadow.store = target.name.clone();
        shadow.original_store = Some(self.name.clone());
        shadow.original_id = Some(id);
        shadow.complete = false;
        shadow.uploading = true;
        shadow.progress = 0.0;
        shadow.token = None;
        shadow.etag = None;
        shadow.path = None;
        shadow.url = None;
        shadow.created_at = OffsetDateTime::now_utc();
        shadow.uploaded_at = None;

        if let Err(reason) = target.filter.check(&shadow) {
            tracing::debug!(reason = %reason, "Target store filter rejected copy");
            return Ok(None);
        }
        if !target.permissions.check_insert(None, &shadow) {
            tracing::debug!("Target store permissions rejected copy");
            return Err(StoreError::Forbidden);
        }

        target.metadata.insert_file(&shadow).await?;

        let result = match self.backend.read_stream(&id.to_string()).await {
            Ok(source) => Box::pin(target.write(source, shadow.id)).await,
            Err(e) => Err(StoreError::Backend(e)),
        };

        match result {
            Ok(copy) => Ok(Some(copy)),
            Err(e) => {
                tracing::error!(
                    file_id = %id,
                    store = %self.name,
                    target = %target.name,
                    error = %e,
                    "Failed to copy file"
                );
                metrics::COPIES_FAILED.inc();
                if let Err(cleanup) = target.metadata.delete_file(shadow.id).await {
                    tracing::warn!(copy_id = %shadow.id, error = %cleanup, "Failed to remove copy record");
                }
                if let Some(hook) = &self.hooks.on_copy_error {
                    hook(&file, &e);
                }
                Err(e)
            }
        }
    }

    /// Delete a file on behalf of `actor`, along with its copies.
    #[tracing::instrument(skip(self), fields(store = %self.name))]
    pub async fn delete(&self, id: FileId, actor: Option<&str>) -> StoreResult<()> {
        let file = self.require(id).await?;
        if !self.permissions.check_remove(actor, &file) {
            return Err(StoreError::Forbidden);
        }
        self.purge(&file, actor).await
    }

    /// Remove a file's bytes, staging file, record, token and copies.
    ///
    /// Copies whose store denies `actor` removal are left in place.
    async fn purge(&self, file: &FileRecord, actor: Option<&str>) -> StoreResult<()> {
        match self.backend.delete(&file.id.to_string()).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                tracing::error!(file_id = %file.id, store = %self.name, error = %e, "Failed to delete file from backend");
                return Err(e.into());
            }
        }

        // Chunks re-check the record under the file lock, so the record goes
        // away before the lock is released.
        let guard = match &self.staging {
            Some(staging) => {
                let guard = staging.lock(file.id).await;
                if let Err(e) = staging.remove(file.id).await {
                    tracing::warn!(file_id = %file.id, error = %e, "Failed to remove staging file");
                }
                Some(guard)
            }
            None => None,
        };

        self.metadata.delete_file(file.id).await?;
        drop(guard);
        if let Some(staging) = &self.staging {
            staging.forget(file.id).await;
        }
        tracing::debug!(file_id = %file.id, "File deleted");

        for target in &self.copy_to {
            let copies = match target.metadata.list_copies(&target.name, file.id).await {
                Ok(copies) => copies,
                Err(e) => {
                    tracing::warn!(target = %target.name, error = %e, "Failed to list copies");
                    continue;
                }
            };
            for copy in copies {
                if !target.permissions.check_remove(actor, &copy) {
                    tracing::warn!(target = %target.name, copy_id = %copy.id, "Copy removal denied by target store permissions");
                    continue;
                }
                if let Err(e) = Box::pin(target.purge(&copy, actor)).await {
                    tracing::warn!(target = %target.name, copy_id = %copy.id, error = %e, "Failed to delete copy");
                }
            }
        }
        Ok(())
    }

    /// Absolute URL of a path inside this store.
    pub fn url(&self, path: &str) -> String {
        let root = self.root_url.trim_end_matches('/');
        self.join_url(root, path)
    }

    /// URL of a path inside this store, without scheme and host.
    pub fn relative_url(&self, path: &str) -> String {
        let root_path = reqwest::Url::parse(&self.root_url)
            .map(|url| url.path().trim_end_matches('/').to_string())
            .unwrap_or_default();
        self.join_url(&root_path, path)
    }

    pub fn file_url(&self, file: &FileRecord) -> String {
        self.url(&format!("{}/{}", file.id, file.name))
    }

    pub fn file_relative_url(&self, file: &FileRecord) -> String {
        self.relative_url(&format!("{}/{}", file.id, file.name))
    }

    fn join_url(&self, root: &str, path: &str) -> String {
        let path = path.trim().trim_end_matches('/');
        let raw = format!("{root}/{}/{}/{path}", self.stores_path, self.name);
        utf8_percent_encode(&raw, URI_ENCODE_SET).to_string()
    }
}

fn report_read_error(
    store: &str,
    hook: Option<&ErrorHook>,
    file: &FileRecord,
    err: &StorageError,
) {
    tracing::error!(
        file_id = %file.id,
        store = %store,
        error = %err,
        "Failed to read file from store backend"
    );
    if let Some(hook) = hook {
        hook(file, err);
    }
}
