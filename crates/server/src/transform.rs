//! Stream transforms applied when a store writes or serves a file.
//!
//! A transform takes ownership of the input stream and returns the stream
//! that replaces it. Identity is the absence of a transform.

use axum::http::HeaderMap;
use stowage_core::FileRecord;
use stowage_storage::ByteStream;

/// Rewrites the bytes of a file on their way into the backend.
pub trait WriteTransform: Send + Sync + 'static {
    fn transform(&self, input: ByteStream, file: &FileRecord) -> ByteStream;
}

/// Rewrites the bytes of a file on their way to a client.
///
/// The transform may edit the response headers, e.g. to change the content
/// type or drop a length that no longer holds.
pub trait ReadTransform: Send + Sync + 'static {
    fn transform(
        &self,
        input: ByteStream,
        file: &FileRecord,
        headers: &mut HeaderMap,
    ) -> ByteStream;
}

impl<F> WriteTransform for F
where
    F: Fn(ByteStream, &FileRecord) -> ByteStream + Send + Sync + 'static,
{
    fn transform(&self, input: ByteStream, file: &FileRecord) -> ByteStream {
        self(input, file)
    }
}

impl<F> ReadTransform for F
where
    F: Fn(ByteStream, &FileRecord, &mut HeaderMap) -> ByteStream + Send + Sync + 'static,
{
    fn transform(
        &self,
        input: ByteStream,
        file: &FileRecord,
        headers: &mut HeaderMap,
    ) -> ByteStream {
        self(input, file, headers)
    }
}
