//! Upload Service
//!
//! Server half of the chunk transfer engine. Ties the session registry, the
//! storage backend and the completion notifier together:
//! - a chunk is committed to storage and credited to its session while the
//!   session's lock is held, so commits on one session never interleave
//! - a chunk is credited only if the storage write succeeded in full
//! - the request that delivers the last byte also finalizes the session

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use uuid::Uuid;

use super::notifier::{CompletionEvent, CompletionNotifier, HookResponse};
use super::registry::{SessionGuard, SessionRegistry};
use super::storage::UploadStorage;
use super::types::{
    Chunk, SessionStatus, StorageObject, UploadError, UploadMetadata, UploadSession,
    DEFAULT_EXPIRY_SECS, DEFAULT_MAX_UPLOAD_SIZE,
};

/// Limits applied by the service
#[derive(Debug, Clone)]
pub struct UploadLimits {
    /// Largest declared size accepted at initiation
    pub max_size: u64,
    /// Inactivity window before an unfinished session expires
    pub expiry: Duration,
    /// How long terminal sessions stay queryable
    pub retention: Duration,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_UPLOAD_SIZE,
            expiry: Duration::from_secs(DEFAULT_EXPIRY_SECS),
            retention: Duration::from_secs(DEFAULT_EXPIRY_SECS),
        }
    }
}

/// A finished session as returned to the caller that finished it
#[derive(Debug, Clone)]
pub struct Completion {
    pub object: StorageObject,
    /// Completion hook override; `None` when the hook already ran earlier
    pub response: Option<HookResponse>,
}

/// Result of upload initiation
#[derive(Debug, Clone)]
pub struct CreatedUpload {
    pub session: UploadSession,
    /// Set when a zero-length upload was finalized on creation
    pub completion: Option<Completion>,
}

/// Result of an accepted chunk
#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    pub session: UploadSession,
    /// Set when this chunk completed the upload
    pub completion: Option<Completion>,
}

// ============================================================================
// Upload Service
// ============================================================================

#[derive(Clone)]
pub struct UploadService {
    inner: Arc<UploadServiceInner>,
}

struct UploadServiceInner {
    registry: SessionRegistry,
    storage: Arc<dyn UploadStorage>,
    notifier: CompletionNotifier,
    limits: UploadLimits,
}

impl UploadService {
    pub fn new(
        storage: Arc<dyn UploadStorage>,
        notifier: CompletionNotifier,
        limits: UploadLimits,
    ) -> Self {
        Self {
            inner: Arc::new(UploadServiceInner {
                registry: SessionRegistry::new(),
                storage,
                notifier,
                limits,
            }),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn notifier(&self) -> &CompletionNotifier {
        &self.inner.notifier
    }

    pub fn storage(&self) -> &Arc<dyn UploadStorage> {
        &self.inner.storage
    }

    pub fn limits(&self) -> &UploadLimits {
        &self.inner.limits
    }

    fn expiry_window(&self) -> chrono::Duration {
        to_chrono(self.inner.limits.expiry)
    }

    fn retention_window(&self) -> chrono::Duration {
        to_chrono(self.inner.limits.retention)
    }

    /// Time at which a session expires if left idle
    pub fn expires_at(&self, session: &UploadSession) -> chrono::DateTime<Utc> {
        session.expires_at(self.expiry_window())
    }

    // ========================================================================
    // Protocol Operations
    // ========================================================================

    /// Upload initiation: declare the size and metadata, get a session
    pub async fn create_upload(
        &self,
        declared_size: u64,
        metadata: UploadMetadata,
    ) -> Result<CreatedUpload, UploadError> {
        let max = self.inner.limits.max_size;
        if declared_size > max {
            tracing::info!(declared_size = declared_size, max = max, "Rejected oversized upload");
            return Err(UploadError::SizeLimitExceeded {
                size: declared_size,
                max,
            });
        }

        let session = self.inner.registry.create(declared_size, metadata).await;

        if let Err(e) = self.inner.storage.create(session.id).await {
            let _ = self.inner.registry.remove(session.id).await;
            return Err(e);
        }

        if declared_size > 0 {
            return Ok(CreatedUpload {
                session,
                completion: None,
            });
        }

        // Nothing to send: seal right away
        let mut guard = self.inner.registry.lock(session.id).await?;
        let completion = self.finalize_locked(&mut guard).await?;

        Ok(CreatedUpload {
            session: guard.clone(),
            completion: Some(completion),
        })
    }

    /// Offset query. Doubles as the resume handshake for paused sessions.
    pub async fn offset(&self, id: Uuid) -> Result<UploadSession, UploadError> {
        self.inner.registry.resume(id).await
    }

    /// Commit one chunk starting at `offset`
    pub async fn write_chunk(
        &self,
        id: Uuid,
        offset: u64,
        data: Bytes,
    ) -> Result<ChunkOutcome, UploadError> {
        let mut guard = self.inner.registry.lock_live(id).await?;

        if guard.is_terminal() {
            return Err(UploadError::InvalidState {
                id,
                status: guard.status,
            });
        }

        let chunk = Chunk::new(offset, data, guard.chunks_committed);

        if chunk.offset != guard.received {
            tracing::debug!(
                session_id = %id,
                expected = guard.received,
                actual = chunk.offset,
                "Rejected chunk at wrong offset"
            );
            return Err(UploadError::OffsetMismatch {
                expected: guard.received,
                actual: chunk.offset,
            });
        }

        if chunk.end() > guard.declared_size {
            return Err(UploadError::ChunkOverrun {
                end: chunk.end(),
                declared: guard.declared_size,
            });
        }

        if chunk.is_empty() {
            guard.touch();
            return Ok(ChunkOutcome {
                session: guard.clone(),
                completion: None,
            });
        }

        let stored = match self
            .inner
            .storage
            .write_chunk(id, chunk.offset, &chunk.data)
            .await
        {
            Ok(stored) => stored,
            Err(UploadError::OffsetMismatch { expected, actual }) => {
                tracing::warn!(
                    session_id = %id,
                    registry = guard.received,
                    stored = expected,
                    "Storage offset disagrees with session"
                );
                return Err(UploadError::OffsetMismatch { expected, actual });
            }
            Err(e) => {
                let reason = e.to_string();
                let _ = guard.fail(reason.as_str());
                tracing::error!(session_id = %id, error = %reason, "Chunk write failed");
                return Err(UploadError::StorageBackendError(reason));
            }
        };

        if guard.status != SessionStatus::Active {
            guard.transition(SessionStatus::Active)?;
        }
        guard.advance_to(stored)?;
        guard.chunks_committed += 1;

        tracing::debug!(
            session_id = %id,
            sequence = chunk.sequence,
            offset = chunk.offset,
            length = chunk.len(),
            received = guard.received,
            declared = guard.declared_size,
            progress = format!("{:.1}%", guard.progress()),
            "Chunk committed"
        );

        let completion = if guard.is_fully_received() {
            Some(self.finalize_locked(&mut guard).await?)
        } else {
            None
        };

        Ok(ChunkOutcome {
            session: guard.clone(),
            completion,
        })
    }

    /// Seal a fully received session.
    ///
    /// Completing an already complete session returns its object again
    /// without firing the notifier a second time.
    pub async fn finalize(&self, id: Uuid) -> Result<Completion, UploadError> {
        let mut guard = self.inner.registry.lock_live(id).await?;

        if guard.status == SessionStatus::Complete {
            if let Some(object) = guard.object.clone() {
                return Ok(Completion {
                    object,
                    response: None,
                });
            }
        }

        if guard.is_terminal() {
            return Err(UploadError::InvalidState {
                id,
                status: guard.status,
            });
        }

        self.finalize_locked(&mut guard).await
    }

    async fn finalize_locked(&self, session: &mut SessionGuard) -> Result<Completion, UploadError> {
        let id = session.id;

        if !session.is_fully_received() {
            return Err(UploadError::IncompleteUpload {
                received: session.received,
                declared: session.declared_size,
            });
        }

        let stored = self.inner.storage.read_offset(id).await?;
        if stored < session.declared_size {
            return Err(UploadError::IncompleteUpload {
                received: stored,
                declared: session.declared_size,
            });
        }

        let object = match self
            .inner
            .storage
            .finalize(id, &session.object_name, session.metadata.filetype())
            .await
        {
            Ok(object) => object,
            Err(e) => {
                let reason = e.to_string();
                let _ = session.fail(reason.as_str());
                tracing::error!(session_id = %id, error = %reason, "Finalize failed");
                return Err(UploadError::StorageBackendError(reason));
            }
        };

        session.complete(object.clone())?;

        tracing::info!(
            session_id = %id,
            key = %object.key,
            size = object.size,
            backend = self.inner.storage.backend_name(),
            "Upload session completed"
        );

        let event = CompletionEvent {
            session_id: id,
            display_name: object.name.clone(),
            object: object.clone(),
            metadata: session.metadata.clone(),
            completed_at: Utc::now(),
        };
        let response = self.inner.notifier.notify(&event);

        Ok(Completion { object, response })
    }

    /// Client-initiated pause, or connection lost mid-chunk
    pub async fn pause(&self, id: Uuid) -> Result<UploadSession, UploadError> {
        self.inner.registry.pause(id).await
    }

    /// Client reports an unrecoverable error for the session
    pub async fn fail(&self, id: Uuid, reason: &str) -> Result<UploadSession, UploadError> {
        self.inner.registry.fail(id, reason).await
    }

    /// Termination: forget the session and its partial data
    pub async fn terminate(&self, id: Uuid) -> Result<(), UploadError> {
        let session = {
            // Wait for any in-flight commit before tearing down
            let guard = self.inner.registry.lock(id).await?;
            self.inner.registry.remove_locked(&guard).await?
        };

        if session.status != SessionStatus::Complete {
            self.inner.storage.discard(id).await?;
        }

        tracing::info!(session_id = %id, received = session.received, "Upload terminated");
        Ok(())
    }

    /// Session snapshot in any status
    pub async fn status(&self, id: Uuid) -> Result<UploadSession, UploadError> {
        self.inner.registry.get_any(id).await
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Expire idle sessions and collect their partial data.
    ///
    /// Partial data of failed sessions is collected once their record is
    /// purged.
    ///
    /// Returns the number of sessions expired.
    pub async fn sweep_expired(&self) -> usize {
        let report = self
            .inner
            .registry
            .sweep(self.expiry_window(), self.retention_window())
            .await;

        for id in report.expired.iter().chain(&report.abandoned) {
            if let Err(e) = self.inner.storage.discard(*id).await {
                tracing::warn!(session_id = %id, error = %e, "Failed to collect partial upload");
            }
        }

        report.expired.len()
    }

    /// Start background cleanup task
    pub fn start_cleanup_task(self, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;
                self.sweep_expired().await;
            }
        })
    }
}

/// Out-of-range windows saturate at a century
fn to_chrono(window: Duration) -> chrono::Duration {
    chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::notifier::CompletedUploads;
    use crate::upload::storage::{compute_hash, LocalUploadStorage};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    const MIB: usize = 1024 * 1024;

    fn service(temp_dir: &TempDir) -> UploadService {
        UploadService::new(
            Arc::new(LocalUploadStorage::new(temp_dir.path())),
            CompletionNotifier::with_default_hook(),
            UploadLimits::default(),
        )
    }

    fn metadata(name: &str, filetype: &str) -> UploadMetadata {
        UploadMetadata::new()
            .with("filename", name)
            .with("filetype", filetype)
    }

    fn pattern(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>())
    }

    /// Local storage whose writes can be made to fail
    struct FlakyStorage {
        inner: LocalUploadStorage,
        fail_writes: AtomicBool,
        stale_offset: AtomicBool,
    }

    impl FlakyStorage {
        fn new(temp_dir: &TempDir) -> Self {
            Self {
                inner: LocalUploadStorage::new(temp_dir.path()),
                fail_writes: AtomicBool::new(false),
                stale_offset: AtomicBool::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl UploadStorage for FlakyStorage {
        fn backend_name(&self) -> &'static str {
            "flaky"
        }
        async fn create(&self, id: Uuid) -> Result<(), UploadError> {
            self.inner.create(id).await
        }
        async fn write_chunk(&self, id: Uuid, offset: u64, data: &[u8]) -> Result<u64, UploadError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(UploadError::StorageBackendError("disk full".to_string()));
            }
            if self.stale_offset.load(Ordering::SeqCst) {
                return Err(UploadError::OffsetMismatch {
                    expected: offset + 1,
                    actual: offset,
                });
            }
            self.inner.write_chunk(id, offset, data).await
        }
        async fn read_offset(&self, id: Uuid) -> Result<u64, UploadError> {
            self.inner.read_offset(id).await
        }
        async fn finalize(
            &self,
            id: Uuid,
            name: &str,
            content_type: Option<&str>,
        ) -> Result<StorageObject, UploadError> {
            self.inner.finalize(id, name, content_type).await
        }
        async fn discard(&self, id: Uuid) -> Result<(), UploadError> {
            self.inner.discard(id).await
        }
    }

    #[tokio::test]
    async fn test_two_chunk_upload() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir);
        let data = pattern(20 * MIB);

        let created = service
            .create_upload(data.len() as u64, metadata("movie.mp4", "video/mp4"))
            .await
            .unwrap();
        let id = created.session.id;
        assert!(created.completion.is_none());

        let first = service
            .write_chunk(id, 0, data.slice(..10 * MIB))
            .await
            .unwrap();
        assert_eq!(first.session.received, (10 * MIB) as u64);
        assert_eq!(first.session.status, SessionStatus::Active);
        assert!(first.completion.is_none());

        let second = service
            .write_chunk(id, (10 * MIB) as u64, data.slice(10 * MIB..))
            .await
            .unwrap();
        let completion = second.completion.unwrap();

        assert_eq!(second.session.status, SessionStatus::Complete);
        assert_eq!(completion.object.size, (20 * MIB) as u64);
        assert_eq!(completion.object.sha256, compute_hash(&data));

        let finalized = service.finalize(id).await.unwrap();
        assert_eq!(finalized.object, completion.object);
        assert!(finalized.response.is_none());
    }

    #[tokio::test]
    async fn test_completion_fires_once_with_display_name() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir);
        let completed = Arc::new(CompletedUploads::default());
        service.notifier().register(completed.clone());

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        service
            .notifier()
            .register(Arc::new(move |_: &CompletionEvent| {
                seen.fetch_add(1, Ordering::SeqCst);
            }));

        let data = pattern(5 * MIB);
        let created = service
            .create_upload(data.len() as u64, metadata("original.mov", "video/quicktime"))
            .await
            .unwrap();
        let id = created.session.id;
        let epoch = created.session.created_at.timestamp_millis();

        let outcome = service.write_chunk(id, 0, data).await.unwrap();
        let response = outcome.completion.unwrap().response.unwrap();
        assert_eq!(response.status, axum::http::StatusCode::OK);

        service.finalize(id).await.unwrap();
        service.finalize(id).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let list = completed.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, format!("{}-original.mov", epoch));
    }

    #[tokio::test]
    async fn test_zero_length_upload_finalizes_immediately() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir);

        let created = service
            .create_upload(0, metadata("empty.txt", "text/plain"))
            .await
            .unwrap();

        assert_eq!(created.session.status, SessionStatus::Complete);
        let completion = created.completion.unwrap();
        assert_eq!(completion.object.size, 0);
        assert_eq!(completion.object.sha256, compute_hash(b""));

        let again = service.finalize(created.session.id).await.unwrap();
        assert_eq!(again.object.size, 0);
    }

    #[tokio::test]
    async fn test_wrong_offset_is_rejected_without_state_change() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir);

        let created = service
            .create_upload(100, metadata("a.bin", "application/octet-stream"))
            .await
            .unwrap();
        let id = created.session.id;
        service
            .write_chunk(id, 0, Bytes::from_static(b"0123456789"))
            .await
            .unwrap();
        let before = service.status(id).await.unwrap();

        for offset in [0u64, 5, 11, 90] {
            let result = service
                .write_chunk(id, offset, Bytes::from_static(b"abcdefghij"))
                .await;
            assert!(matches!(
                result,
                Err(UploadError::OffsetMismatch { expected: 10, .. })
            ));
        }

        let after = service.status(id).await.unwrap();
        assert_eq!(after.received, before.received);
        assert_eq!(after.chunks_committed, before.chunks_committed);
        assert_eq!(service.storage().read_offset(id).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_chunk_past_declared_size_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir);

        let created = service.create_upload(4, UploadMetadata::new()).await.unwrap();
        let result = service
            .write_chunk(created.session.id, 0, Bytes::from_static(b"12345"))
            .await;

        assert!(matches!(result, Err(UploadError::ChunkOverrun { .. })));
        assert_eq!(service.status(created.session.id).await.unwrap().received, 0);
    }

    #[tokio::test]
    async fn test_size_limit() {
        let temp_dir = TempDir::new().unwrap();
        let service = UploadService::new(
            Arc::new(LocalUploadStorage::new(temp_dir.path())),
            CompletionNotifier::new(),
            UploadLimits {
                max_size: 1024,
                ..UploadLimits::default()
            },
        );

        let result = service.create_upload(1025, UploadMetadata::new()).await;
        assert!(matches!(
            result,
            Err(UploadError::SizeLimitExceeded {
                size: 1025,
                max: 1024
            })
        ));
        assert!(service.registry().is_empty().await);

        assert!(service.create_upload(1024, UploadMetadata::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_finalize_incomplete_upload() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir);

        let created = service.create_upload(10, UploadMetadata::new()).await.unwrap();
        let id = created.session.id;
        service
            .write_chunk(id, 0, Bytes::from_static(b"12345"))
            .await
            .unwrap();

        let result = service.finalize(id).await;
        assert!(matches!(
            result,
            Err(UploadError::IncompleteUpload {
                received: 5,
                declared: 10
            })
        ));
        assert_eq!(service.status(id).await.unwrap().status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_storage_error_fails_session() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(FlakyStorage::new(&temp_dir));
        let service = UploadService::new(
            storage.clone(),
            CompletionNotifier::new(),
            UploadLimits::default(),
        );

        let created = service.create_upload(10, UploadMetadata::new()).await.unwrap();
        let id = created.session.id;
        service
            .write_chunk(id, 0, Bytes::from_static(b"12345"))
            .await
            .unwrap();

        storage.fail_writes.store(true, Ordering::SeqCst);
        let result = service
            .write_chunk(id, 5, Bytes::from_static(b"67890"))
            .await;
        assert!(matches!(result, Err(UploadError::StorageBackendError(_))));

        let session = service.status(id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.received, 5);

        // Partial bytes stay queryable
        assert_eq!(service.offset(id).await.unwrap().received, 5);

        storage.fail_writes.store(false, Ordering::SeqCst);
        let result = service
            .write_chunk(id, 5, Bytes::from_static(b"67890"))
            .await;
        assert!(matches!(result, Err(UploadError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_rejected_write_leaves_status_alone() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(FlakyStorage::new(&temp_dir));
        let service = UploadService::new(
            storage.clone(),
            CompletionNotifier::new(),
            UploadLimits::default(),
        );

        let created = service.create_upload(10, UploadMetadata::new()).await.unwrap();
        let id = created.session.id;
        service
            .write_chunk(id, 0, Bytes::from_static(b"123"))
            .await
            .unwrap();
        service.pause(id).await.unwrap();

        storage.stale_offset.store(true, Ordering::SeqCst);
        let result = service.write_chunk(id, 3, Bytes::from_static(b"45")).await;
        assert!(matches!(result, Err(UploadError::OffsetMismatch { .. })));

        let session = service.status(id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Paused);
        assert_eq!(session.received, 3);
        assert_eq!(session.chunks_committed, 1);

        let fresh = service.create_upload(10, UploadMetadata::new()).await.unwrap();
        let result = service
            .write_chunk(fresh.session.id, 0, Bytes::from_static(b"1"))
            .await;
        assert!(matches!(result, Err(UploadError::OffsetMismatch { .. })));
        assert_eq!(
            service.status(fresh.session.id).await.unwrap().status,
            SessionStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_pause_and_resume_continue_from_acknowledged_offset() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir);
        let data = pattern(30);

        let created = service.create_upload(30, UploadMetadata::new()).await.unwrap();
        let id = created.session.id;
        service.write_chunk(id, 0, data.slice(..12)).await.unwrap();

        let paused = service.pause(id).await.unwrap();
        assert_eq!(paused.status, SessionStatus::Paused);

        let resumed = service.offset(id).await.unwrap();
        assert_eq!(resumed.status, SessionStatus::Active);
        assert_eq!(resumed.received, 12);

        let outcome = service
            .write_chunk(id, resumed.received, data.slice(12..))
            .await
            .unwrap();
        let object = outcome.completion.unwrap().object;
        let stored = tokio::fs::read(temp_dir.path().join(&object.key)).await.unwrap();
        assert_eq!(stored, data.to_vec());
    }

    #[tokio::test]
    async fn test_concurrent_chunks_commit_once() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir);

        let created = service.create_upload(100, UploadMetadata::new()).await.unwrap();
        let id = created.session.id;

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            tasks.push(tokio::spawn(async move {
                service
                    .write_chunk(id, 0, Bytes::from_static(b"0123456789"))
                    .await
            }));
        }

        let mut accepted = 0;
        for result in futures::future::join_all(tasks).await {
            match result.unwrap() {
                Ok(_) => accepted += 1,
                Err(UploadError::OffsetMismatch { .. }) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(accepted, 1);
        assert_eq!(service.status(id).await.unwrap().received, 10);
        assert_eq!(service.storage().read_offset(id).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_sweep_expires_and_collects_partial_data() {
        let temp_dir = TempDir::new().unwrap();
        let service = UploadService::new(
            Arc::new(LocalUploadStorage::new(temp_dir.path())),
            CompletionNotifier::new(),
            UploadLimits {
                expiry: Duration::ZERO,
                retention: Duration::from_secs(3600),
                ..UploadLimits::default()
            },
        );

        let created = service.create_upload(10, UploadMetadata::new()).await.unwrap();
        let id = created.session.id;
        service
            .write_chunk(id, 0, Bytes::from_static(b"123"))
            .await
            .unwrap();
        service.pause(id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(service.sweep_expired().await, 1);

        assert!(matches!(
            service.offset(id).await,
            Err(UploadError::SessionExpired(_))
        ));
        assert!(matches!(
            service.write_chunk(id, 3, Bytes::from_static(b"4")).await,
            Err(UploadError::SessionExpired(_))
        ));
        assert!(service.storage().read_offset(id).await.is_err());
    }

    #[tokio::test]
    async fn test_terminate() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir);

        let created = service.create_upload(10, UploadMetadata::new()).await.unwrap();
        let id = created.session.id;
        service
            .write_chunk(id, 0, Bytes::from_static(b"123"))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), service.terminate(id))
            .await
            .expect("termination must not wait on its own lock")
            .unwrap();

        assert!(matches!(
            service.offset(id).await,
            Err(UploadError::SessionNotFound(_))
        ));
        assert!(service.storage().read_offset(id).await.is_err());
    }

    #[tokio::test]
    async fn test_sweep_collects_failed_partial_data() {
        let temp_dir = TempDir::new().unwrap();
        let service = UploadService::new(
            Arc::new(LocalUploadStorage::new(temp_dir.path())),
            CompletionNotifier::new(),
            UploadLimits {
                expiry: Duration::ZERO,
                retention: Duration::ZERO,
                ..UploadLimits::default()
            },
        );

        let created = service.create_upload(10, UploadMetadata::new()).await.unwrap();
        let id = created.session.id;
        service
            .write_chunk(id, 0, Bytes::from_static(b"123"))
            .await
            .unwrap();
        service.fail(id, "retries exhausted").await.unwrap();
        assert_eq!(service.storage().read_offset(id).await.unwrap(), 3);

        tokio::time::sleep(Duration::from_millis(5)).await;
        service.sweep_expired().await;

        assert!(service.registry().is_empty().await);
        assert!(service.storage().read_offset(id).await.is_err());
    }
}
