#[path = "../src/uploader.rs"]
#[allow(dead_code)] // Some accessors are used by the binary but not by tests
mod uploader;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stowage_core::{FileDescriptor, FileId, FileRecord};
use tokio::sync::mpsc;
use uploader::{
    AbortHandle, RemoteFile, StopHandle, UploadError, UploadEvent, UploadOutcome, UploadState,
    UploadTransport, Uploader, UploaderOptions,
};

/// In-memory server side of an upload.
#[derive(Default)]
struct MockTransport {
    creates: AtomicUsize,
    chunk_attempts: AtomicUsize,
    completes: AtomicUsize,
    stops: AtomicUsize,
    deletes: AtomicUsize,
    /// Bytes of every accepted chunk, in order.
    received: Mutex<Vec<u8>>,
    chunk_sizes: Mutex<Vec<usize>>,
    progress: Mutex<Vec<f64>>,
    /// Statuses answered to the next chunk attempts. Success statuses accept.
    failures: Mutex<VecDeque<u16>>,
    /// Fail every chunk attempt with this status.
    always_fail: Option<u16>,
    /// Simulated round trip of each accepted chunk.
    round_trips: Mutex<VecDeque<Duration>>,
    /// Request a stop once this many chunks were accepted.
    stop_after: Mutex<Option<(usize, StopHandle)>>,
    /// Request an abort once this many chunks were accepted.
    abort_after: Mutex<Option<(usize, AbortHandle)>>,
}

impl MockTransport {
    fn failing(status: u16) -> Self {
        Self {
            always_fail: Some(status),
            ..Default::default()
        }
    }

    fn with_failures(statuses: &[u16]) -> Self {
        Self {
            failures: Mutex::new(statuses.iter().copied().collect()),
            ..Default::default()
        }
    }

    fn with_round_trips(trips: &[Duration]) -> Self {
        Self {
            round_trips: Mutex::new(trips.iter().copied().collect()),
            ..Default::default()
        }
    }

    fn received(&self) -> Vec<u8> {
        self.received.lock().unwrap().clone()
    }

    fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UploadTransport for MockTransport {
    async fn create(
        &self,
        store: &str,
        descriptor: &FileDescriptor,
    ) -> Result<RemoteFile, UploadError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        assert_eq!(descriptor.store.as_deref(), Some(store));
        Ok(RemoteFile {
            file_id: FileId::new(),
            token: "token".to_string(),
            url: "http://files.test/ufs/files/id".to_string(),
        })
    }

    async fn send_chunk(
        &self,
        _file: &RemoteFile,
        data: Bytes,
        progress: f64,
    ) -> Result<(), UploadError> {
        self.chunk_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.always_fail {
            return Err(UploadError::from_status(status, "mock failure"));
        }
        let failure = self.failures.lock().unwrap().pop_front();
        if let Some(status) = failure
            && status >= 300
        {
            return Err(UploadError::from_status(status, "mock failure"));
        }

        let round_trip = self.round_trips.lock().unwrap().pop_front();
        if let Some(round_trip) = round_trip {
            tokio::time::sleep(round_trip).await;
        }

        let accepted = {
            let mut sizes = self.chunk_sizes.lock().unwrap();
            sizes.push(data.len());
            sizes.len()
        };
        self.received.lock().unwrap().extend_from_slice(&data);
        self.progress.lock().unwrap().push(progress);

        // The stop lands while this chunk is still in flight.
        let stop = self.stop_after.lock().unwrap().take();
        match stop {
            Some((after, handle)) if accepted == after => handle.stop(),
            other => *self.stop_after.lock().unwrap() = other,
        }
        let abort = self.abort_after.lock().unwrap().take();
        match abort {
            Some((after, handle)) if accepted == after => handle.abort(),
            other => *self.abort_after.lock().unwrap() = other,
        }
        Ok(())
    }

    async fn complete(&self, store: &str, file: &RemoteFile) -> Result<FileRecord, UploadError> {
        self.completes.fetch_add(1, Ordering::SeqCst);
        let size = self.received.lock().unwrap().len() as u64;
        let mut record =
            FileRecord::from_descriptor(store, &FileDescriptor::new("upload.bin", size));
        record.id = file.file_id;
        record.complete = true;
        record.uploading = false;
        record.progress = 1.0;
        Ok(record)
    }

    async fn stop(&self, _store: &str, _file: &RemoteFile) -> Result<(), UploadError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, _store: &str, _file: &RemoteFile) -> Result<(), UploadError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }
    Bytes::from(data)
}

fn fixed_options(chunk_size: usize) -> UploaderOptions {
    UploaderOptions {
        adaptive: false,
        chunk_size,
        ..Default::default()
    }
}

fn uploader(
    transport: &Arc<MockTransport>,
    data: Bytes,
    options: UploaderOptions,
) -> Uploader<Arc<MockTransport>> {
    Uploader::new(
        transport.clone(),
        "files",
        FileDescriptor::new("upload.bin", 0),
        data,
        options,
    )
    .unwrap()
}

fn drain(rx: &mut mpsc::UnboundedReceiver<UploadEvent>) -> Vec<UploadEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn test_upload_sends_every_byte_in_order() {
    let transport = Arc::new(MockTransport::default());
    let data = seeded_bytes(1, 100_000);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut session = uploader(&transport, data.clone(), fixed_options(16 * 1024)).with_events(tx);
    let outcome = session.start().await.unwrap();

    let UploadOutcome::Complete(record) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(record.size, 100_000);
    assert_eq!(session.state(), UploadState::Complete);
    assert_eq!(transport.received(), data.to_vec());
    assert_eq!(MockTransport::count(&transport.creates), 1);
    assert_eq!(MockTransport::count(&transport.chunk_attempts), 7);
    assert_eq!(MockTransport::count(&transport.completes), 1);
    assert_eq!(MockTransport::count(&transport.deletes), 0);

    let progress = transport.progress.lock().unwrap().clone();
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(progress.last().copied(), Some(1.0));

    let stats = session.stats();
    assert_eq!(stats.loaded, 100_000);
    assert_eq!(stats.progress, 1.0);
    assert_eq!(stats.remaining_time, Duration::ZERO);

    let events = drain(&mut rx);
    assert!(matches!(events.first(), Some(UploadEvent::Created(_))));
    assert!(matches!(events.get(1), Some(UploadEvent::Started)));
    let progress_events = events
        .iter()
        .filter(|e| matches!(e, UploadEvent::Progress(_)))
        .count();
    assert_eq!(progress_events, 7);
    assert!(matches!(events.last(), Some(UploadEvent::Completed(_))));

    // A completed session reports the same record again.
    let again = session.start().await.unwrap();
    assert!(matches!(again, UploadOutcome::Complete(_)));
    assert_eq!(MockTransport::count(&transport.completes), 1);
}

#[tokio::test(start_paused = true)]
async fn test_always_failing_transport_retries_then_deletes_once() {
    let transport = Arc::new(MockTransport::failing(503));
    let options = UploaderOptions {
        max_tries: 5,
        ..fixed_options(1024)
    };
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = uploader(&transport, seeded_bytes(2, 4096), options).with_events(tx);

    let started = tokio::time::Instant::now();
    let err = session.start().await.unwrap_err();

    assert!(matches!(err, UploadError::Aborted { tries: 5, .. }), "{err}");
    // One first attempt plus five retries, each retry after the 2s delay.
    assert_eq!(MockTransport::count(&transport.chunk_attempts), 6);
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(MockTransport::count(&transport.deletes), 1);
    assert_eq!(MockTransport::count(&transport.completes), 0);

    assert_eq!(session.state(), UploadState::Idle);
    assert!(session.remote().is_none());
    assert_eq!(session.stats().loaded, 0);

    let events = drain(&mut rx);
    assert!(matches!(events.last(), Some(UploadEvent::Aborted)));
    assert!(events.iter().any(|e| matches!(e, UploadEvent::Error(_))));
}

#[tokio::test(start_paused = true)]
async fn test_terminal_status_aborts_immediately() {
    for status in [403, 404, 413, 500] {
        let transport = Arc::new(MockTransport::failing(status));
        let mut session = uploader(&transport, seeded_bytes(3, 4096), fixed_options(1024));

        let err = session.start().await.unwrap_err();
        match err {
            UploadError::Rejected { status: got, .. } => assert_eq!(got, status),
            other => panic!("expected rejection for {status}, got {other}"),
        }
        assert_eq!(MockTransport::count(&transport.chunk_attempts), 1);
        assert_eq!(MockTransport::count(&transport.deletes), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retry_same_chunk() {
    // Both failures hit the first chunk.
    let transport = Arc::new(MockTransport::with_failures(&[502, 429]));
    let data = seeded_bytes(4, 3000);
    let mut session = uploader(&transport, data.clone(), fixed_options(1000));

    let outcome = session.start().await.unwrap();
    assert!(matches!(outcome, UploadOutcome::Complete(_)));
    assert_eq!(transport.received(), data.to_vec());
    assert_eq!(*transport.chunk_sizes.lock().unwrap(), vec![1000, 1000, 1000]);
    assert_eq!(MockTransport::count(&transport.chunk_attempts), 5);
    assert_eq!(MockTransport::count(&transport.deletes), 0);
}

#[tokio::test(start_paused = true)]
async fn test_retry_counter_resets_after_success() {
    // Each chunk uses up every retry; a counter that kept counting would abort.
    let transport = Arc::new(MockTransport::with_failures(&[503, 503, 200, 503, 503]));
    let options = UploaderOptions {
        max_tries: 2,
        ..fixed_options(1000)
    };
    let mut session = uploader(&transport, seeded_bytes(5, 2000), options);

    let outcome = session.start().await.unwrap();
    assert!(matches!(outcome, UploadOutcome::Complete(_)));
    assert_eq!(MockTransport::count(&transport.chunk_attempts), 6);
    assert_eq!(MockTransport::count(&transport.deletes), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_applies_in_flight_chunk_and_resumes() {
    let transport = Arc::new(MockTransport::default());
    let data = seeded_bytes(6, 10_000);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = uploader(&transport, data.clone(), fixed_options(1000)).with_events(tx);

    *transport.stop_after.lock().unwrap() = Some((3, session.stop_handle()));
    let outcome = session.start().await.unwrap();

    assert!(matches!(outcome, UploadOutcome::Stopped));
    assert_eq!(session.state(), UploadState::Paused);
    assert_eq!(MockTransport::count(&transport.stops), 1);
    // The chunk in flight when stop was requested still counts.
    assert_eq!(session.stats().loaded, 3000);
    assert_eq!(transport.received().len(), 3000);

    // Elapsed time is frozen while paused.
    let frozen = session.stats().elapsed;
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(session.stats().elapsed, frozen);

    let events = drain(&mut rx);
    assert!(matches!(events.last(), Some(UploadEvent::Stopped)));

    let outcome = session.start().await.unwrap();
    assert!(matches!(outcome, UploadOutcome::Complete(_)));
    assert_eq!(MockTransport::count(&transport.creates), 1);
    assert_eq!(transport.received(), data.to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_adaptive_chunk_size_follows_round_trip() {
    let transport = Arc::new(MockTransport::with_round_trips(&[
        Duration::from_secs(2),
        Duration::from_secs(2),
        Duration::from_millis(300),
        Duration::from_millis(300),
        Duration::from_millis(1),
    ]));
    let options = UploaderOptions {
        adaptive: true,
        capacity: 0.9,
        chunk_size: 1000,
        max_chunk_size: 1500,
        transfer_delay: Duration::ZERO,
        ..Default::default()
    };
    let data = seeded_bytes(7, 20_000);
    let mut session = uploader(&transport, data.clone(), options);
    session.start().await.unwrap();

    let sizes = transport.chunk_sizes.lock().unwrap().clone();
    assert_eq!(sizes[0], 1000);
    // Overshoots shrink.
    assert!(sizes[1] < sizes[0], "{sizes:?}");
    assert!(sizes[2] < sizes[1], "{sizes:?}");
    // Undershoots grow.
    assert!(sizes[3] > sizes[2], "{sizes:?}");
    assert!(sizes[4] > sizes[3], "{sizes:?}");
    // Never above the maximum.
    assert!(sizes.iter().all(|&s| s <= 1500), "{sizes:?}");
    assert_eq!(transport.received(), data.to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_abort_handle_cancels_running_upload() {
    let transport = Arc::new(MockTransport::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session =
        uploader(&transport, seeded_bytes(9, 10_000), fixed_options(1000)).with_events(tx);

    *transport.abort_after.lock().unwrap() = Some((2, session.abort_handle()));
    let outcome = session.start().await.unwrap();

    assert!(matches!(outcome, UploadOutcome::Aborted));
    assert_eq!(session.state(), UploadState::Idle);
    assert!(session.remote().is_none());
    assert_eq!(session.stats().loaded, 0);
    assert_eq!(MockTransport::count(&transport.chunk_attempts), 2);
    assert_eq!(MockTransport::count(&transport.deletes), 1);
    assert_eq!(MockTransport::count(&transport.stops), 0);
    assert_eq!(MockTransport::count(&transport.completes), 0);

    let events = drain(&mut rx);
    assert!(matches!(events.last(), Some(UploadEvent::Aborted)));
}

#[tokio::test(start_paused = true)]
async fn test_abort_without_remote_file_skips_delete() {
    let transport = Arc::new(MockTransport::default());
    let mut session = uploader(&transport, seeded_bytes(8, 100), fixed_options(10));

    session.abort().await;
    assert_eq!(MockTransport::count(&transport.deletes), 0);
    assert_eq!(session.state(), UploadState::Idle);
}

#[test]
fn test_invalid_capacity_is_rejected() {
    let transport = Arc::new(MockTransport::default());
    let result = Uploader::new(
        transport,
        "files",
        FileDescriptor::new("a.bin", 0),
        Bytes::from_static(b"abc"),
        UploaderOptions {
            capacity: 2.0,
            ..Default::default()
        },
    );
    assert!(matches!(result, Err(UploadError::InvalidOptions(_))));
}
