//! Storage test utilities.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use stowage_storage::{ByteStream, StorageError, StorageResult, StoreBackend, StreamingUpload};

/// Backend whose writes fail after accepting a few chunks.
///
/// Reads always report the object as missing.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
#[derive(Debug, Clone, Default)]
pub struct FailingBackend {
    aborted: Arc<AtomicUsize>,
    /// Chunks accepted before the write fails.
    accept_chunks: usize,
}

#[allow(dead_code)]
impl FailingBackend {
    pub fn new(accept_chunks: usize) -> Self {
        Self {
            aborted: Arc::new(AtomicUsize::new(0)),
            accept_chunks,
        }
    }

    /// Number of writes aborted so far.
    pub fn aborted(&self) -> usize {
        self.aborted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreBackend for FailingBackend {
    async fn exists(&self, _key: &str) -> StorageResult<bool> {
        Ok(false)
    }

    async fn read_stream(&self, key: &str) -> StorageResult<ByteStream> {
        Err(StorageError::NotFound(key.to_string()))
    }

    async fn write_stream(&self, _key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        Ok(Box::new(FailingUpload {
            aborted: self.aborted.clone(),
            accept_chunks: self.accept_chunks,
            written: 0,
        }))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        Err(StorageError::NotFound(key.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

struct FailingUpload {
    aborted: Arc<AtomicUsize>,
    accept_chunks: usize,
    written: usize,
}

#[async_trait]
impl StreamingUpload for FailingUpload {
    async fn write(&mut self, _data: Bytes) -> StorageResult<()> {
        if self.written >= self.accept_chunks {
            return Err(StorageError::Io(std::io::Error::other("disk unplugged")));
        }
        self.written += 1;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        Err(StorageError::Io(std::io::Error::other("disk unplugged")))
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        self.aborted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
