//! Client-side upload session.
//!
//! An [`Uploader`] creates the remote record, then sends the file in chunks
//! whose size adapts to the measured round trip. Transient failures retry the
//! same chunk; terminal ones abort the session and delete the remote record.
//! A session can be stopped and resumed within the same process, or aborted
//! from another task while it runs.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use stowage_core::{FileDescriptor, FileId, FileRecord};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;

/// Statuses that end a transfer on the spot.
const TERMINAL_STATUSES: [u16; 7] = [400, 402, 403, 404, 409, 413, 500];

/// Tolerance around the target chunk duration.
const CAPACITY_MARGIN: f64 = 0.1;

/// Upload errors.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The server answered with a status worth retrying.
    #[error("server returned {status}: {message}")]
    Transient { status: u16, message: String },

    /// The server refused the request for good.
    #[error("request rejected with {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The request never got an answer.
    #[error("transport error: {0}")]
    Transport(String),

    /// Every retry of a chunk failed.
    #[error("upload aborted after {tries} retries: {last}")]
    Aborted { tries: u32, last: String },

    #[error("invalid uploader options: {0}")]
    InvalidOptions(String),
}

impl UploadError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if TERMINAL_STATUSES.contains(&status) {
            Self::Rejected { status, message }
        } else {
            Self::Transient { status, message }
        }
    }

    /// Whether the same request may succeed if sent again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Transport(_))
    }
}

/// Remote record created for an upload.
#[derive(Clone, Debug, Deserialize)]
pub struct RemoteFile {
    pub file_id: FileId,
    pub token: String,
    /// Where chunks are posted.
    pub url: String,
}

/// Calls an uploader makes against the server.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn create(&self, store: &str, descriptor: &FileDescriptor)
    -> Result<RemoteFile, UploadError>;

    /// Append a chunk. `progress` is the fraction sent once it lands.
    async fn send_chunk(
        &self,
        file: &RemoteFile,
        data: Bytes,
        progress: f64,
    ) -> Result<(), UploadError>;

    async fn complete(&self, store: &str, file: &RemoteFile) -> Result<FileRecord, UploadError>;

    async fn stop(&self, store: &str, file: &RemoteFile) -> Result<(), UploadError>;

    async fn delete(&self, store: &str, file: &RemoteFile) -> Result<(), UploadError>;
}

#[async_trait]
impl<T: UploadTransport + ?Sized> UploadTransport for Arc<T> {
    async fn create(
        &self,
        store: &str,
        descriptor: &FileDescriptor,
    ) -> Result<RemoteFile, UploadError> {
        (**self).create(store, descriptor).await
    }

    async fn send_chunk(
        &self,
        file: &RemoteFile,
        data: Bytes,
        progress: f64,
    ) -> Result<(), UploadError> {
        (**self).send_chunk(file, data, progress).await
    }

    async fn complete(&self, store: &str, file: &RemoteFile) -> Result<FileRecord, UploadError> {
        (**self).complete(store, file).await
    }

    async fn stop(&self, store: &str, file: &RemoteFile) -> Result<(), UploadError> {
        (**self).stop(store, file).await
    }

    async fn delete(&self, store: &str, file: &RemoteFile) -> Result<(), UploadError> {
        (**self).delete(store, file).await
    }
}

/// Session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    Creating,
    Uploading,
    Paused,
    Completing,
    Complete,
    Aborting,
}

/// Tuning knobs of an upload session.
#[derive(Clone, Debug)]
pub struct UploaderOptions {
    /// Resize chunks after each round trip.
    pub adaptive: bool,
    /// Target duration of one chunk round trip, in seconds. Must be in `(0, 1]`.
    pub capacity: f64,
    /// Initial chunk size in bytes.
    pub chunk_size: usize,
    /// Largest chunk, 0 for no limit.
    pub max_chunk_size: usize,
    /// Retries of one chunk before the session aborts.
    pub max_tries: u32,
    pub retry_delay: Duration,
    /// Pause between two chunks.
    pub transfer_delay: Duration,
}

impl Default for UploaderOptions {
    fn default() -> Self {
        Self {
            adaptive: true,
            capacity: 0.9,
            chunk_size: stowage_core::DEFAULT_CHUNK_SIZE,
            max_chunk_size: stowage_core::MAX_CLIENT_CHUNK_SIZE,
            max_tries: 5,
            retry_delay: Duration::from_secs(2),
            transfer_delay: Duration::from_millis(100),
        }
    }
}

impl UploaderOptions {
    pub fn validate(&self) -> Result<(), UploadError> {
        if !(self.capacity > 0.0 && self.capacity <= 1.0) {
            return Err(UploadError::InvalidOptions(format!(
                "capacity must be in (0, 1], got {}",
                self.capacity
            )));
        }
        if self.chunk_size == 0 {
            return Err(UploadError::InvalidOptions(
                "chunk_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Size of the next chunk given how long the last one took.
///
/// The target band is `[capacity * 0.9, capacity * 1.1)` seconds. Above it the
/// size shrinks by `upper / elapsed`, below it the size grows by
/// `lower / elapsed`. The result is at least 1 and at most `max` when `max > 0`.
pub fn next_chunk_size(current: usize, elapsed: Duration, capacity: f64, max: usize) -> usize {
    let secs = elapsed.as_secs_f64();
    let upper = capacity * (1.0 + CAPACITY_MARGIN);
    let lower = capacity * (1.0 - CAPACITY_MARGIN);

    let scaled = if secs <= 0.0 {
        current as f64
    } else if secs >= upper {
        current as f64 * (upper / secs)
    } else if secs < lower {
        current as f64 * (lower / secs)
    } else {
        current as f64
    };

    let size = (scaled.round() as usize).max(1);
    if max > 0 { size.min(max) } else { size }
}

/// Transfer telemetry.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadStats {
    pub loaded: u64,
    pub total: u64,
    /// Fraction in `[0, 1]`.
    pub progress: f64,
    pub elapsed: Duration,
    /// Bytes per second over the whole session.
    pub average_speed: f64,
    /// Bytes per second of the last chunk.
    pub speed: f64,
    pub remaining_time: Duration,
}

/// Notifications emitted by a session.
#[derive(Clone, Debug)]
pub enum UploadEvent {
    Created(FileId),
    Started,
    Progress(UploadStats),
    Stopped,
    Completed(FileRecord),
    Aborted,
    Error(String),
}

/// How [`Uploader::start`] returned.
#[derive(Debug)]
pub enum UploadOutcome {
    Complete(FileRecord),
    /// Paused by a [`StopHandle`]; call `start` again to resume.
    Stopped,
    /// Cancelled by an [`AbortHandle`]; the remote record is gone.
    Aborted,
}

/// Requests a cooperative stop of a running session.
#[derive(Clone, Debug)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// The session pauses before its next chunk.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Requests that a running session abort and delete its remote record.
#[derive(Clone, Debug)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    /// The session aborts before its next chunk.
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// One file upload.
pub struct Uploader<T> {
    transport: T,
    store: String,
    descriptor: FileDescriptor,
    data: Bytes,
    options: UploaderOptions,
    events: Option<UnboundedSender<UploadEvent>>,
    stop_requested: Arc<AtomicBool>,
    abort_requested: Arc<AtomicBool>,

    state: UploadState,
    remote: Option<RemoteFile>,
    offset: usize,
    chunk_size: usize,
    tries: u32,
    elapsed: Duration,
    started_at: Option<Instant>,
    last_chunk: usize,
    last_round_trip: Option<Duration>,
    record: Option<FileRecord>,
}

impl<T: UploadTransport> Uploader<T> {
    /// Prepare an upload of `data` into `store`.
    ///
    /// The descriptor's size is overwritten with the length of `data`.
    pub fn new(
        transport: T,
        store: impl Into<String>,
        mut descriptor: FileDescriptor,
        data: Bytes,
        options: UploaderOptions,
    ) -> Result<Self, UploadError> {
        options.validate()?;
        let store = store.into();
        descriptor.size = data.len() as u64;
        descriptor.store = Some(store.clone());
        Ok(Self {
            transport,
            store,
            descriptor,
            data,
            chunk_size: options.chunk_size,
            options,
            events: None,
            stop_requested: Arc::new(AtomicBool::new(false)),
            abort_requested: Arc::new(AtomicBool::new(false)),
            state: UploadState::Idle,
            remote: None,
            offset: 0,
            tries: 0,
            elapsed: Duration::ZERO,
            started_at: None,
            last_chunk: 0,
            last_round_trip: None,
            record: None,
        })
    }

    /// Send session events to `events`.
    pub fn with_events(mut self, events: UnboundedSender<UploadEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop_requested.clone())
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle(self.abort_requested.clone())
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Stored record, once the upload completed.
    pub fn record(&self) -> Option<&FileRecord> {
        self.record.as_ref()
    }

    /// Remote record of the session, once created.
    pub fn remote(&self) -> Option<&RemoteFile> {
        self.remote.as_ref()
    }

    /// Current chunk size.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn stats(&self) -> UploadStats {
        let loaded = self.offset as u64;
        let total = self.data.len() as u64;
        let elapsed = self.elapsed_time();
        let secs = elapsed.as_secs_f64();

        let average_speed = if secs > 0.0 { loaded as f64 / secs } else { 0.0 };
        let speed = match self.last_round_trip {
            Some(rtt) if self.state == UploadState::Uploading && !rtt.is_zero() => {
                self.last_chunk as f64 / rtt.as_secs_f64()
            }
            _ => 0.0,
        };
        let remaining = total.saturating_sub(loaded);
        let remaining_time = if average_speed > 0.0 && remaining > 0 {
            Duration::from_secs_f64(remaining as f64 / average_speed)
        } else {
            Duration::ZERO
        };
        let progress = if total == 0 {
            1.0
        } else {
            (loaded as f64 / total as f64).min(1.0)
        };

        UploadStats {
            loaded,
            total,
            progress,
            elapsed,
            average_speed,
            speed,
            remaining_time,
        }
    }

    fn elapsed_time(&self) -> Duration {
        self.elapsed + self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    fn emit(&self, event: UploadEvent) {
        if let Some(events) = &self.events {
            // A dropped receiver only means nobody is listening.
            let _ = events.send(event);
        }
    }

    /// Start or resume the transfer and run it until it completes, is stopped
    /// or fails.
    pub async fn start(&mut self) -> Result<UploadOutcome, UploadError> {
        if let Some(record) = &self.record {
            return Ok(UploadOutcome::Complete(record.clone()));
        }
        // Requests made from here on, creation included, apply to this run.
        self.stop_requested.store(false, Ordering::SeqCst);
        self.abort_requested.store(false, Ordering::SeqCst);
        let remote = match self.remote.clone() {
            Some(remote) => remote,
            None => self.create().await?,
        };

        self.tries = 0;
        self.started_at = Some(Instant::now());
        self.state = UploadState::Uploading;
        self.emit(UploadEvent::Started);

        self.run(remote).await
    }

    async fn create(&mut self) -> Result<RemoteFile, UploadError> {
        self.state = UploadState::Creating;
        match self.transport.create(&self.store, &self.descriptor).await {
            Ok(remote) => {
                tracing::debug!(file_id = %remote.file_id, store = %self.store, "Upload created");
                self.emit(UploadEvent::Created(remote.file_id));
                self.remote = Some(remote.clone());
                Ok(remote)
            }
            Err(e) => {
                self.state = UploadState::Idle;
                self.emit(UploadEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn run(&mut self, remote: RemoteFile) -> Result<UploadOutcome, UploadError> {
        let total = self.data.len();

        loop {
            if self.abort_requested.swap(false, Ordering::SeqCst) {
                self.abort().await;
                return Ok(UploadOutcome::Aborted);
            }
            if self.stop_requested.swap(false, Ordering::SeqCst) {
                self.pause(&remote).await;
                return Ok(UploadOutcome::Stopped);
            }
            if self.offset >= total {
                return self.finish(&remote).await;
            }

            let size = self.chunk_size;
            let end = total.min(self.offset + size);
            let chunk = self.data.slice(self.offset..end);
            let progress = end as f64 / total as f64;

            let sent_at = Instant::now();
            match self.transport.send_chunk(&remote, chunk, progress).await {
                Ok(()) => {
                    let round_trip = sent_at.elapsed();
                    self.last_chunk = end - self.offset;
                    self.last_round_trip = Some(round_trip);
                    self.offset = end;
                    self.tries = 0;
                    if self.options.adaptive {
                        self.chunk_size = next_chunk_size(
                            size,
                            round_trip,
                            self.options.capacity,
                            self.options.max_chunk_size,
                        );
                    }
                    self.emit(UploadEvent::Progress(self.stats()));
                    tokio::time::sleep(self.options.transfer_delay).await;
                }
                Err(e) if e.is_transient() && self.tries < self.options.max_tries => {
                    self.tries += 1;
                    tracing::warn!(
                        file_id = %remote.file_id,
                        offset = self.offset,
                        tries = self.tries,
                        error = %e,
                        "Chunk failed, retrying"
                    );
                    tokio::time::sleep(self.options.retry_delay).await;
                }
                Err(e) => {
                    let err = if e.is_transient() {
                        UploadError::Aborted {
                            tries: self.tries,
                            last: e.to_string(),
                        }
                    } else {
                        e
                    };
                    self.emit(UploadEvent::Error(err.to_string()));
                    self.abort().await;
                    return Err(err);
                }
            }
        }
    }

    /// Freeze the clock and tell the server the session is paused.
    async fn pause(&mut self, remote: &RemoteFile) {
        if let Some(started) = self.started_at.take() {
            self.elapsed += started.elapsed();
        }
        self.state = UploadState::Paused;
        if let Err(e) = self.transport.stop(&self.store, remote).await {
            tracing::warn!(file_id = %remote.file_id, error = %e, "Failed to notify server of stop");
        }
        self.emit(UploadEvent::Stopped);
    }

    async fn finish(&mut self, remote: &RemoteFile) -> Result<UploadOutcome, UploadError> {
        self.state = UploadState::Completing;

        match self.transport.complete(&self.store, remote).await {
            Ok(record) => {
                if let Some(started) = self.started_at.take() {
                    self.elapsed += started.elapsed();
                }
                self.state = UploadState::Complete;
                self.record = Some(record.clone());
                self.emit(UploadEvent::Completed(record.clone()));
                Ok(UploadOutcome::Complete(record))
            }
            Err(e) => {
                self.emit(UploadEvent::Error(e.to_string()));
                self.abort().await;
                Err(e)
            }
        }
    }

    /// Delete the remote record and return to the pre-upload state.
    ///
    /// Use an [`AbortHandle`] while `start` is running.
    pub async fn abort(&mut self) {
        self.state = UploadState::Aborting;
        if let Some(remote) = self.remote.take()
            && let Err(e) = self.transport.delete(&self.store, &remote).await
        {
            tracing::error!(file_id = %remote.file_id, error = %e, "Cannot remove aborted upload");
            self.emit(UploadEvent::Error(e.to_string()));
        }

        self.offset = 0;
        self.tries = 0;
        self.elapsed = Duration::ZERO;
        self.started_at = None;
        self.last_chunk = 0;
        self.last_round_trip = None;
        self.chunk_size = self.options.chunk_size;
        self.state = UploadState::Idle;
        self.emit(UploadEvent::Aborted);
    }
}
