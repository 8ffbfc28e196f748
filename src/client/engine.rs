//! Client Transfer Engine
//!
//! Drives one upload against an [`UploadTransport`]:
//! - declares the upload, or picks up an existing one by URL
//! - asks the server for its offset before every chunk and sends exactly one
//!   chunk from there
//! - retries transient failures on a fixed delay schedule, one retry per
//!   delay; a chunk that lands resets the schedule
//! - on cancellation stops sending and leaves the upload paused on the server

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::transport::{RemoteUpload, TransportError, UploadTransport};
use crate::upload::{UploadMetadata, DEFAULT_CHUNK_SIZE};

/// Default retry schedule: 0s, 1s, 3s, 5s, 10s, 20s
pub const DEFAULT_RETRY_DELAYS_MS: [u64; 6] = [0, 1_000, 3_000, 5_000, 10_000, 20_000];

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Upper bound on the size of each chunk
    pub chunk_size: usize,
    /// Delay before each retry; its length bounds the retry count
    pub retry_delays: Vec<Duration>,
    /// MIME globs (`video/*`) or extensions (`.mp4`); empty allows anything
    pub allowed_file_types: Vec<String>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry_delays: DEFAULT_RETRY_DELAYS_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            allowed_file_types: Vec::new(),
        }
    }
}

// ============================================================================
// Events and Errors
// ============================================================================

/// Events emitted while a transfer runs
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Progress {
        bytes_uploaded: u64,
        bytes_total: u64,
    },
    Retrying {
        attempt: usize,
        delay: Duration,
        error: String,
    },
    Success {
        upload: RemoteUpload,
        bytes_total: u64,
    },
    Error {
        message: String,
    },
}

/// Transfer errors
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("File type not allowed: {0}")]
    UnsupportedFileType(String),

    #[error("Upload cancelled at offset {offset}")]
    Cancelled {
        upload: Option<RemoteUpload>,
        offset: u64,
    },

    #[error("Upload failed after {attempts} retries: {source}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        source: TransportError,
    },

    #[error("Upload rejected: {0}")]
    Rejected(#[source] TransportError),

    #[error("Server expects {remote} bytes but the source has {local}")]
    LengthMismatch { local: u64, remote: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A finished transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub upload: RemoteUpload,
    pub bytes_total: u64,
}

// ============================================================================
// Upload Source
// ============================================================================

/// Bytes to upload
#[derive(Debug, Clone)]
pub enum UploadSource {
    Memory(Bytes),
    /// Read chunk by chunk, never held in memory as a whole
    File { path: PathBuf, len: u64 },
}

impl UploadSource {
    pub async fn file(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let len = tokio::fs::metadata(&path).await?.len();
        Ok(Self::File { path, len })
    }

    pub fn len(&self) -> u64 {
        match self {
            Self::Memory(data) => data.len() as u64,
            Self::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn read(&self, offset: u64, len: usize) -> std::io::Result<Bytes> {
        match self {
            Self::Memory(data) => {
                let start = offset as usize;
                Ok(data.slice(start..start + len))
            }
            Self::File { path, .. } => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(std::io::SeekFrom::Start(offset)).await?;
                let mut buffer = vec![0u8; len];
                file.read_exact(&mut buffer).await?;
                Ok(Bytes::from(buffer))
            }
        }
    }
}

impl From<Bytes> for UploadSource {
    fn from(data: Bytes) -> Self {
        Self::Memory(data)
    }
}

impl From<Vec<u8>> for UploadSource {
    fn from(data: Vec<u8>) -> Self {
        Self::Memory(Bytes::from(data))
    }
}

/// Check a file against allowed-type patterns
pub fn is_allowed_file_type(
    patterns: &[String],
    filetype: Option<&str>,
    filename: Option<&str>,
) -> bool {
    if patterns.is_empty() {
        return true;
    }

    let mime = filetype.map(|t| t.split(';').next().unwrap_or(t).trim().to_ascii_lowercase());
    let name = filename.map(str::to_ascii_lowercase);

    patterns.iter().any(|pattern| {
        let pattern = pattern.trim().to_ascii_lowercase();
        if pattern.starts_with('.') {
            return name.as_deref().is_some_and(|n| n.ends_with(&pattern));
        }
        let Some(mime) = mime.as_deref() else {
            return false;
        };
        if pattern == "*" || pattern == "*/*" {
            return true;
        }
        match pattern.strip_suffix("/*") {
            Some(top) => mime.split('/').next() == Some(top),
            None => mime == pattern,
        }
    })
}

// ============================================================================
// Transfer Engine
// ============================================================================

pub struct TransferEngine {
    transport: Arc<dyn UploadTransport>,
    config: TransferConfig,
    events: Option<mpsc::UnboundedSender<TransferEvent>>,
    cancel: CancellationToken,
}

enum StepError {
    Transport(TransportError),
    Fatal(TransferError),
}

impl From<TransportError> for StepError {
    fn from(e: TransportError) -> Self {
        StepError::Transport(e)
    }
}

impl TransferEngine {
    pub fn new(transport: Arc<dyn UploadTransport>, config: TransferConfig) -> Self {
        Self {
            transport,
            config,
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Receive progress events for every transfer run by this engine
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<TransferEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    /// Abort transfers when `token` is cancelled
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that aborts the running transfer when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    fn emit(&self, event: TransferEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Upload a file from disk, naming it after the file
    pub async fn upload_file(
        &self,
        path: &Path,
        filetype: Option<&str>,
    ) -> Result<TransferOutcome, TransferError> {
        let source = UploadSource::file(path).await?;
        self.upload(source, file_metadata(path, filetype)).await
    }

    /// Resume an upload of a file from disk
    pub async fn resume_file(&self, url: &str, path: &Path) -> Result<TransferOutcome, TransferError> {
        let source = UploadSource::file(path).await?;
        self.resume(url, source).await
    }

    /// Declare a new upload and send the source
    pub async fn upload(
        &self,
        source: impl Into<UploadSource>,
        metadata: UploadMetadata,
    ) -> Result<TransferOutcome, TransferError> {
        let source = source.into();

        if !is_allowed_file_type(
            &self.config.allowed_file_types,
            metadata.filetype(),
            metadata.filename(),
        ) {
            let kind = metadata
                .filetype()
                .or(metadata.filename())
                .unwrap_or("unknown")
                .to_string();
            self.emit(TransferEvent::Error {
                message: format!("File type not allowed: {}", kind),
            });
            return Err(TransferError::UnsupportedFileType(kind));
        }

        let upload = self.create(source.len(), &metadata).await?;
        tracing::info!(
            upload_id = %upload.id,
            url = %upload.url,
            length = source.len(),
            "Upload created"
        );

        self.transfer(upload, &source).await
    }

    /// Continue an upload created earlier, from the server's offset
    pub async fn resume(
        &self,
        url: &str,
        source: impl Into<UploadSource>,
    ) -> Result<TransferOutcome, TransferError> {
        let source = source.into();
        let upload = RemoteUpload::from_url(url).map_err(TransferError::Rejected)?;
        tracing::info!(upload_id = %upload.id, url = %upload.url, "Resuming upload");
        self.transfer(upload, &source).await
    }

    async fn create(
        &self,
        length: u64,
        metadata: &UploadMetadata,
    ) -> Result<RemoteUpload, TransferError> {
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(TransferError::Cancelled { upload: None, offset: 0 });
                }
                result = self.transport.create(length, metadata) => result,
            };

            match result {
                Ok(upload) => return Ok(upload),
                Err(e) => {
                    attempt = self.backoff(attempt, e).await.map_err(|e| {
                        self.emit(TransferEvent::Error {
                            message: e.to_string(),
                        });
                        e
                    })?;
                }
            }
        }
    }

    /// Wait out the next retry delay, or give up.
    ///
    /// Returns the updated attempt count.
    async fn backoff(&self, attempt: usize, error: TransportError) -> Result<usize, TransferError> {
        if !error.is_retryable() {
            return Err(TransferError::Rejected(error));
        }
        let Some(delay) = self.config.retry_delays.get(attempt).copied() else {
            return Err(TransferError::RetriesExhausted {
                attempts: attempt,
                source: error,
            });
        };

        let attempt = attempt + 1;
        tracing::warn!(
            attempt = attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying upload request"
        );
        self.emit(TransferEvent::Retrying {
            attempt,
            delay,
            error: error.to_string(),
        });

        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
        Ok(attempt)
    }

    /// One round trip: query the offset, then send one chunk from there.
    ///
    /// Returns the server's offset afterwards.
    async fn step(
        &self,
        upload: &RemoteUpload,
        source: &UploadSource,
    ) -> Result<u64, StepError> {
        let total = source.len();
        let remote = self.transport.offset(upload).await?;

        if remote.length != total {
            return Err(StepError::Fatal(TransferError::LengthMismatch {
                local: total,
                remote: remote.length,
            }));
        }
        if remote.offset >= total {
            return Ok(remote.offset);
        }

        let len = (total - remote.offset).min(self.config.chunk_size.max(1) as u64) as usize;
        let data = source
            .read(remote.offset, len)
            .await
            .map_err(|e| StepError::Fatal(TransferError::Io(e)))?;

        let offset = self.transport.send_chunk(upload, remote.offset, data).await?;
        tracing::debug!(
            upload_id = %upload.id,
            offset = remote.offset,
            length = len,
            new_offset = offset,
            "Chunk sent"
        );
        Ok(offset)
    }

    async fn transfer(
        &self,
        upload: RemoteUpload,
        source: &UploadSource,
    ) -> Result<TransferOutcome, TransferError> {
        let total = source.len();
        let mut attempt = 0;
        let mut offset = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(self.cancelled(&upload, offset).await);
            }

            let result = tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(self.cancelled(&upload, offset).await);
                }
                result = self.step(&upload, source) => result,
            };

            match result {
                Ok(new_offset) => {
                    attempt = 0;
                    offset = new_offset;
                    self.emit(TransferEvent::Progress {
                        bytes_uploaded: offset,
                        bytes_total: total,
                    });

                    if offset >= total {
                        tracing::info!(upload_id = %upload.id, bytes = total, "Upload finished");
                        self.emit(TransferEvent::Success {
                            upload: upload.clone(),
                            bytes_total: total,
                        });
                        return Ok(TransferOutcome {
                            upload,
                            bytes_total: total,
                        });
                    }
                }
                Err(StepError::Transport(e)) => match self.backoff(attempt, e).await {
                    Ok(next) => attempt = next,
                    Err(e) => return Err(self.give_up(&upload, e).await),
                },
                Err(StepError::Fatal(e)) => return Err(self.give_up(&upload, e).await),
            }
        }
    }

    /// Stop sending and leave the upload resumable
    async fn cancelled(&self, upload: &RemoteUpload, offset: u64) -> TransferError {
        if let Err(e) = self.transport.pause(upload).await {
            tracing::warn!(upload_id = %upload.id, error = %e, "Failed to pause upload");
        }
        tracing::info!(upload_id = %upload.id, offset = offset, "Upload cancelled");
        self.emit(TransferEvent::Error {
            message: format!("Upload cancelled at offset {}", offset),
        });
        TransferError::Cancelled {
            upload: Some(upload.clone()),
            offset,
        }
    }

    /// Report a terminal failure to the server and the caller
    async fn give_up(&self, upload: &RemoteUpload, error: TransferError) -> TransferError {
        let reason = error.to_string();
        if let Err(e) = self.transport.fail(upload, &reason).await {
            tracing::debug!(upload_id = %upload.id, error = %e, "Could not mark upload failed");
        }
        tracing::error!(upload_id = %upload.id, error = %reason, "Upload failed");
        self.emit(TransferEvent::Error { message: reason });
        error
    }
}

/// Metadata for a file on disk
pub fn file_metadata(path: &Path, filetype: Option<&str>) -> UploadMetadata {
    let mut metadata = UploadMetadata::new();
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        metadata = metadata.with("filename", name);
    }
    let filetype = filetype
        .map(str::to_string)
        .or_else(|| mime_guess::from_path(path).first().map(|m| m.essence_str().to_string()));
    if let Some(filetype) = filetype {
        metadata = metadata.with("filetype", filetype);
    }
    metadata
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::direct::DirectTransport;
    use crate::client::transport::RemoteOffset;
    use crate::upload::{
        CompletionNotifier, LocalUploadStorage, SessionStatus, UploadLimits, UploadService,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> UploadService {
        UploadService::new(
            Arc::new(LocalUploadStorage::new(dir.path())),
            CompletionNotifier::with_default_hook(),
            UploadLimits::default(),
        )
    }

    fn config(chunk_size: usize, retries: usize) -> TransferConfig {
        TransferConfig {
            chunk_size,
            retry_delays: vec![Duration::ZERO; retries],
            allowed_file_types: Vec::new(),
        }
    }

    fn video(name: &str) -> UploadMetadata {
        UploadMetadata::new()
            .with("filename", name)
            .with("filetype", "video/mp4")
    }

    fn pattern(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i % 253) as u8).collect::<Vec<_>>())
    }

    async fn stored(service: &UploadService, dir: &TempDir, upload: &RemoteUpload) -> Vec<u8> {
        let session = service.status(upload.id).await.unwrap();
        let object = session.object.unwrap();
        tokio::fs::read(dir.path().join(object.key)).await.unwrap()
    }

    /// Failure modes injected around a working transport
    #[derive(Clone, Copy)]
    enum Fault {
        /// Every other chunk fails before reaching the server
        EveryOtherChunk,
        /// Every chunk fails
        Always,
        /// The first chunk lands but its response is lost
        LostResponse,
    }

    struct FaultyTransport {
        inner: DirectTransport,
        fault: Option<Fault>,
        sends: AtomicUsize,
        /// Cancel this token once the given number of chunks has landed
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl FaultyTransport {
        fn new(inner: DirectTransport, fault: Option<Fault>) -> Self {
            Self {
                inner,
                fault,
                sends: AtomicUsize::new(0),
                cancel_after: None,
            }
        }
    }

    #[async_trait]
    impl UploadTransport for FaultyTransport {
        async fn create(
            &self,
            length: u64,
            metadata: &UploadMetadata,
        ) -> Result<RemoteUpload, TransportError> {
            self.inner.create(length, metadata).await
        }

        async fn offset(&self, upload: &RemoteUpload) -> Result<RemoteOffset, TransportError> {
            self.inner.offset(upload).await
        }

        async fn send_chunk(
            &self,
            upload: &RemoteUpload,
            offset: u64,
            data: Bytes,
        ) -> Result<u64, TransportError> {
            let n = self.sends.fetch_add(1, Ordering::SeqCst);

            let result = match self.fault {
                Some(Fault::EveryOtherChunk) if n % 2 == 0 => {
                    Err(TransportError::Transient("connection reset".to_string()))
                }
                Some(Fault::Always) => {
                    Err(TransportError::Transient("connection reset".to_string()))
                }
                Some(Fault::LostResponse) if n == 0 => {
                    self.inner.send_chunk(upload, offset, data).await?;
                    Err(TransportError::Transient("response lost".to_string()))
                }
                _ => self.inner.send_chunk(upload, offset, data).await,
            };

            if let Some((after, token)) = &self.cancel_after {
                if result.is_ok() && n + 1 >= *after {
                    token.cancel();
                }
            }
            result
        }

        async fn pause(&self, upload: &RemoteUpload) -> Result<(), TransportError> {
            self.inner.pause(upload).await
        }

        async fn fail(&self, upload: &RemoteUpload, reason: &str) -> Result<(), TransportError> {
            self.inner.fail(upload, reason).await
        }

        async fn terminate(&self, upload: &RemoteUpload) -> Result<(), TransportError> {
            self.inner.terminate(upload).await
        }
    }

    fn collect(rx: &mut mpsc::UnboundedReceiver<TransferEvent>) -> Vec<TransferEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_allowed_file_types() {
        let patterns = vec!["video/*".to_string(), "image/*".to_string()];
        assert!(is_allowed_file_type(&patterns, Some("video/mp4"), None));
        assert!(is_allowed_file_type(&patterns, Some("image/png; q=1"), None));
        assert!(!is_allowed_file_type(&patterns, Some("text/plain"), None));
        assert!(!is_allowed_file_type(&patterns, None, Some("clip.mp4")));

        let patterns = vec![".mp4".to_string()];
        assert!(is_allowed_file_type(&patterns, None, Some("CLIP.MP4")));
        assert!(is_allowed_file_type(&[], None, None));
    }

    #[tokio::test]
    async fn test_upload_in_chunks() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let transport = Arc::new(DirectTransport::new(service.clone()));
        let mut engine = TransferEngine::new(transport, config(10, 0));
        let mut rx = engine.subscribe();

        let data = pattern(25);
        let outcome = engine.upload(data.clone(), video("clip.mp4")).await.unwrap();
        assert_eq!(outcome.bytes_total, 25);

        let progress: Vec<u64> = collect(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                TransferEvent::Progress { bytes_uploaded, .. } => Some(bytes_uploaded),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![10, 20, 25]);

        let session = service.status(outcome.upload.id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Complete);
        assert_eq!(session.chunks_committed, 3);
        assert_eq!(stored(&service, &dir, &outcome.upload).await, data.to_vec());
    }

    #[tokio::test]
    async fn test_zero_length_upload() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let engine = TransferEngine::new(
            Arc::new(DirectTransport::new(service.clone())),
            config(10, 0),
        );

        let outcome = engine.upload(Bytes::new(), video("empty.mp4")).await.unwrap();
        let session = service.status(outcome.upload.id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Complete);
        assert_eq!(session.object.unwrap().size, 0);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let transport = FaultyTransport::new(
            DirectTransport::new(service.clone()),
            Some(Fault::EveryOtherChunk),
        );
        let mut engine = TransferEngine::new(Arc::new(transport), config(10, 1));
        let mut rx = engine.subscribe();

        let data = pattern(30);
        let outcome = engine.upload(data.clone(), video("clip.mp4")).await.unwrap();

        let events = collect(&mut rx);
        let retries = events
            .iter()
            .filter(|e| matches!(e, TransferEvent::Retrying { attempt: 1, .. }))
            .count();
        // One retry per chunk, the counter resets after each success
        assert_eq!(retries, 3);
        assert!(matches!(events.last(), Some(TransferEvent::Success { .. })));
        assert_eq!(stored(&service, &dir, &outcome.upload).await, data.to_vec());
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_the_session() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let transport = FaultyTransport::new(DirectTransport::new(service.clone()), Some(Fault::Always));
        let mut engine = TransferEngine::new(Arc::new(transport), config(10, 2));
        let mut rx = engine.subscribe();

        let result = engine.upload(pattern(30), video("clip.mp4")).await;
        assert!(matches!(
            result,
            Err(TransferError::RetriesExhausted { attempts: 2, .. })
        ));
        assert!(matches!(
            collect(&mut rx).last(),
            Some(TransferEvent::Error { .. })
        ));

        assert_eq!(
            service.registry().count_with_status(SessionStatus::Failed).await,
            1
        );
    }

    #[tokio::test]
    async fn test_lost_response_does_not_duplicate_bytes() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let transport = FaultyTransport::new(
            DirectTransport::new(service.clone()),
            Some(Fault::LostResponse),
        );
        let engine = TransferEngine::new(Arc::new(transport), config(10, 1));

        let data = pattern(20);
        let outcome = engine.upload(data.clone(), video("clip.mp4")).await.unwrap();

        let session = service.status(outcome.upload.id).await.unwrap();
        assert_eq!(session.received, 20);
        assert_eq!(session.chunks_committed, 2);
        assert_eq!(stored(&service, &dir, &outcome.upload).await, data.to_vec());
    }

    #[tokio::test]
    async fn test_cancel_pauses_and_resume_completes() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);

        let token = CancellationToken::new();
        let mut transport = FaultyTransport::new(DirectTransport::new(service.clone()), None);
        transport.cancel_after = Some((1, token.clone()));
        let engine =
            TransferEngine::new(Arc::new(transport), config(10, 0)).with_cancel_token(token);

        let data = pattern(35);
        let result = engine.upload(data.clone(), video("clip.mp4")).await;
        let (upload, offset) = match result {
            Err(TransferError::Cancelled {
                upload: Some(upload),
                offset,
            }) => (upload, offset),
            other => panic!("expected cancellation, got {:?}", other),
        };
        assert_eq!(offset, 10);

        let session = service.status(upload.id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Paused);
        assert_eq!(session.received, 10);

        let engine = TransferEngine::new(
            Arc::new(DirectTransport::new(service.clone())),
            config(10, 0),
        );
        let outcome = engine.resume(&upload.url, data.clone()).await.unwrap();
        assert_eq!(outcome.upload.id, upload.id);
        assert_eq!(stored(&service, &dir, &upload).await, data.to_vec());
    }

    #[tokio::test]
    async fn test_disallowed_type_is_rejected_before_handshake() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let mut config = config(10, 0);
        config.allowed_file_types = vec!["video/*".to_string(), "image/*".to_string()];
        let engine = TransferEngine::new(Arc::new(DirectTransport::new(service.clone())), config);

        let metadata = UploadMetadata::new()
            .with("filename", "notes.txt")
            .with("filetype", "text/plain");
        let result = engine.upload(pattern(5), metadata).await;

        assert!(matches!(result, Err(TransferError::UnsupportedFileType(_))));
        assert!(service.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_resume_with_different_source_length() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let transport = Arc::new(DirectTransport::new(service.clone()));
        let upload = transport.create(10, &video("clip.mp4")).await.unwrap();

        let engine = TransferEngine::new(transport, config(10, 0));
        let result = engine.resume(&upload.url, pattern(12)).await;
        assert!(matches!(
            result,
            Err(TransferError::LengthMismatch {
                local: 12,
                remote: 10
            })
        ));
    }

    #[tokio::test]
    async fn test_upload_file() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let engine = TransferEngine::new(
            Arc::new(DirectTransport::new(service.clone())),
            config(4, 0),
        );

        let path = dir.path().join("holiday.png");
        let data = pattern(11);
        tokio::fs::write(&path, &data).await.unwrap();

        let outcome = engine.upload_file(&path, None).await.unwrap();
        let session = service.status(outcome.upload.id).await.unwrap();
        assert_eq!(session.metadata.filename(), Some("holiday.png"));
        assert_eq!(session.metadata.filetype(), Some("image/png"));
        assert!(session.object_name.ends_with("-holiday.png"));
        assert_eq!(stored(&service, &dir, &outcome.upload).await, data.to_vec());
    }
}
