//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Backend holding the bytes of one store's files, keyed by file id.
#[async_trait]
pub trait StoreBackend: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Open an object as a byte stream.
    async fn read_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Start a streaming write. Nothing is visible under `key` until
    /// [`StreamingUpload::finish`] succeeds.
    async fn write_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>>;

    /// Delete an object. Missing objects report `NotFound`.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Short backend label for logs and metrics.
    fn backend_name(&self) -> &'static str;

    /// Verify the backend is reachable and writable.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Write a whole object in one call.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<u64> {
        let mut upload = self.write_stream(key).await?;
        if let Err(e) = upload.write(data).await {
            if let Err(abort_err) = upload.abort().await {
                tracing::warn!(key = %key, error = %abort_err, "Failed to abort upload");
            }
            return Err(e);
        }
        upload.finish().await
    }

    /// Read a whole object into memory.
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let mut stream = self.read_stream(key).await?;
        let mut buf = Vec::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(buf))
    }
}

/// Trait for streaming uploads.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Write a chunk of data.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Finish the upload and return the total bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abort the upload, discarding anything written so far.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}

/// Count the bytes of a stream, failing on the first read error.
pub async fn count_bytes(mut stream: ByteStream) -> StorageResult<u64> {
    let mut total = 0u64;
    while let Some(chunk) = stream.next().await {
        total += chunk?.len() as u64;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Rejects every write and fails to abort.
    struct BrokenBackend {
        aborts: Arc<AtomicUsize>,
    }

    struct BrokenUpload {
        aborts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl StreamingUpload for BrokenUpload {
        async fn write(&mut self, _data: Bytes) -> StorageResult<()> {
            Err(StorageError::Io(std::io::Error::other("disk full")))
        }

        async fn finish(self: Box<Self>) -> StorageResult<u64> {
            Ok(0)
        }

        async fn abort(self: Box<Self>) -> StorageResult<()> {
            self.aborts.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::Io(std::io::Error::other("abort failed")))
        }
    }

    #[async_trait]
    impl StoreBackend for BrokenBackend {
        async fn exists(&self, _key: &str) -> StorageResult<bool> {
            Ok(false)
        }

        async fn read_stream(&self, key: &str) -> StorageResult<ByteStream> {
            Err(StorageError::NotFound(key.to_string()))
        }

        async fn write_stream(&self, _key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
            Ok(Box::new(BrokenUpload {
                aborts: self.aborts.clone(),
            }))
        }

        async fn delete(&self, key: &str) -> StorageResult<()> {
            Err(StorageError::NotFound(key.to_string()))
        }

        fn backend_name(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn put_reports_write_error_when_abort_fails() {
        let aborts = Arc::new(AtomicUsize::new(0));
        let backend = BrokenBackend {
            aborts: aborts.clone(),
        };

        let err = backend
            .put("key", Bytes::from_static(b"data"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disk full"), "{err}");
        assert_eq!(aborts.load(Ordering::SeqCst), 1);
    }
}
