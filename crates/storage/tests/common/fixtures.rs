use bytes::Bytes;
use futures::stream;
use stowage_storage::{ByteStream, FilesystemBackend, StorageError};
use tempfile::TempDir;

/// Generate deterministic test data using a seeded pseudo-random generator.
/// Same seed produces same output (reproducible tests)
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    // Simple LCG (Linear Congruential Generator)
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// A filesystem backend rooted in a fresh temp dir.
#[allow(dead_code)]
pub async fn temp_backend() -> (FilesystemBackend, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let backend = FilesystemBackend::new(dir.path().join("store"))
        .await
        .expect("Failed to create filesystem backend");
    (backend, dir)
}

/// Stream `data` in pieces, then fail with an I/O error.
#[allow(dead_code)]
pub fn failing_stream(data: Bytes, piece: usize) -> ByteStream {
    let mut items: Vec<Result<Bytes, StorageError>> = data
        .chunks(piece)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    items.push(Err(StorageError::Io(std::io::Error::other(
        "connection reset",
    ))));
    Box::pin(stream::iter(items))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_bytes_deterministic() {
        let data1 = seeded_bytes(42, 1000);
        let data2 = seeded_bytes(42, 1000);
        assert_eq!(data1, data2);
        assert_ne!(data1, seeded_bytes(43, 1000));
    }
}
