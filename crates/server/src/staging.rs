//! Staging area for partially uploaded files.
//!
//! Chunks of a file are appended to `{dir}/{file_id}` until the client asks
//! for completion, at which point the staged bytes are streamed into the
//! store backend and the staging file is removed. Appends and completion of
//! one file are serialized through a per-file async mutex; different files
//! never contend.

use futures::StreamExt;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stowage_core::FileId;
use stowage_storage::{ByteStream, StorageError};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::io::ReaderStream;

/// Directory of staging files plus the per-file locks guarding them.
#[derive(Debug)]
pub struct StagingArea {
    dir: PathBuf,
    locks: Mutex<HashMap<FileId, Arc<Mutex<()>>>>,
}

impl StagingArea {
    /// Open the staging directory, creating it if needed.
    ///
    /// On unix the directory is set to mode 0744; failing to do so is logged
    /// and otherwise ignored.
    pub async fn new(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o744)).await
            {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to set staging directory permissions");
            }
        }

        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Staging file path for a file.
    pub fn path(&self, id: FileId) -> PathBuf {
        self.dir.join(id.to_string())
    }

    /// Acquire the lock serializing work on one file.
    pub async fn lock(&self, id: FileId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Drop the lock entry of a file that no longer accepts chunks.
    ///
    /// The entry stays while another request holds or waits on it, so every
    /// request for one file keeps going through the same mutex.
    pub async fn forget(&self, id: FileId) {
        let mut locks = self.locks.lock().await;
        if locks.get(&id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&id);
        }
    }

    #[cfg(test)]
    async fn tracked(&self, id: FileId) -> bool {
        self.locks.lock().await.contains_key(&id)
    }

    /// Append a chunk to the staging file. Callers hold the file lock.
    pub async fn append(&self, id: FileId, data: &[u8]) -> io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(id))
            .await?;
        file.write_all(data).await?;
        file.flush().await
    }

    /// Open the staged bytes of a file for completion.
    ///
    /// Returns `None` when no chunk was ever staged.
    pub async fn open(&self, id: FileId) -> io::Result<Option<StagedFile>> {
        let path = self.path(id);
        match fs::File::open(&path).await {
            Ok(file) => Ok(Some(StagedFile {
                path,
                file: Some(file),
                discarded: false,
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Remove the staging file of a file. A missing file is not an error.
    pub async fn remove(&self, id: FileId) -> io::Result<()> {
        match fs::remove_file(self.path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// An open staging file that is removed once completion is over.
///
/// Call [`StagedFile::discard`] on every path; the `Drop` impl only covers
/// early returns and panics.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    file: Option<fs::File>,
    discarded: bool,
}

impl StagedFile {
    /// Take the staged bytes as a stream. Subsequent calls yield an empty stream.
    pub fn take_stream(&mut self) -> ByteStream {
        match self.file.take() {
            Some(file) => {
                Box::pin(ReaderStream::new(file).map(|chunk| chunk.map_err(StorageError::Io)))
            }
            None => Box::pin(futures::stream::empty()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the staging file.
    pub async fn discard(mut self) -> io::Result<()> {
        self.discarded = true;
        drop(self.file.take());
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.discarded {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_storage::count_bytes;

    #[tokio::test]
    async fn append_then_open_streams_all_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path().join("tmp")).await.unwrap();
        let id = FileId::new();

        {
            let _guard = staging.lock(id).await;
            staging.append(id, b"hello ").await.unwrap();
            staging.append(id, b"world").await.unwrap();
        }
        assert_eq!(std::fs::metadata(staging.path(id)).unwrap().len(), 11);

        let mut staged = staging.open(id).await.unwrap().unwrap();
        let stream = staged.take_stream();
        assert_eq!(count_bytes(stream).await.unwrap(), 11);
        staged.discard().await.unwrap();
        assert!(!staging.path(id).exists());
    }

    #[tokio::test]
    async fn open_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path()).await.unwrap();
        assert!(staging.open(FileId::new()).await.unwrap().is_none());
        staging.remove(FileId::new()).await.unwrap();
    }

    #[tokio::test]
    async fn dropped_staged_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path()).await.unwrap();
        let id = FileId::new();
        staging.append(id, b"data").await.unwrap();

        let staged = staging.open(id).await.unwrap().unwrap();
        drop(staged);
        assert!(!staging.path(id).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn staging_dir_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path().join("ufs")).await.unwrap();
        let mode = std::fs::metadata(staging.dir()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o744);
    }

    #[tokio::test]
    async fn lock_serializes_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let staging = Arc::new(StagingArea::new(dir.path()).await.unwrap());
        let id = FileId::new();

        let guard = staging.lock(id).await;
        let other = staging.clone();
        let waiter = tokio::spawn(async move {
            let _guard = other.lock(id).await;
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        // A different file is not blocked.
        let _unrelated = staging.lock(FileId::new()).await;

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn forget_keeps_contended_lock() {
        let dir = tempfile::tempdir().unwrap();
        let staging = Arc::new(StagingArea::new(dir.path()).await.unwrap());
        let id = FileId::new();

        let guard = staging.lock(id).await;
        let other = staging.clone();
        let waiter = tokio::spawn(async move {
            drop(other.lock(id).await);
            other.forget(id).await;
        });
        tokio::task::yield_now().await;

        drop(guard);
        staging.forget(id).await;
        assert!(staging.tracked(id).await, "waiter still needs the same mutex");

        waiter.await.unwrap();
        assert!(!staging.tracked(id).await);
    }
}
