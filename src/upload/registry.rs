//! Upload Session Registry
//!
//! Tracks in-flight and resumable sessions with:
//! - An arena of session records, each behind its own mutex
//! - Per-session serialization of chunk commits
//! - Inactivity expiry and purging of old terminal records

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use super::types::{SessionStatus, StorageObject, UploadError, UploadMetadata, UploadSession};

/// A session record. Holding its lock is what serializes chunk commits.
pub type SessionHandle = Arc<Mutex<UploadSession>>;

/// Exclusive access to one session
pub type SessionGuard = OwnedMutexGuard<UploadSession>;

// ============================================================================
// Session Registry
// ============================================================================

/// Registry of upload sessions
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    /// The map lock is only held to look up or insert records
    sessions: RwLock<HashMap<Uuid, SessionHandle>>,
}

/// Outcome of one expiry sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Active sessions that went quiet and were paused
    pub paused: Vec<Uuid>,
    /// Sessions moved to `expired`; their partial data can be collected
    pub expired: Vec<Uuid>,
    /// Terminal records removed from the registry
    pub purged: Vec<Uuid>,
    /// Purged records that never completed; their partial data can be collected
    pub abandoned: Vec<Uuid>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Create and register a new session
    pub async fn create(&self, declared_size: u64, metadata: UploadMetadata) -> UploadSession {
        let session = UploadSession::new(declared_size, metadata);
        let id = session.id;

        {
            let mut sessions = self.inner.sessions.write().await;
            sessions.insert(id, Arc::new(Mutex::new(session.clone())));
        }

        tracing::info!(
            session_id = %id,
            declared_size = declared_size,
            object_name = %session.object_name,
            "Created upload session"
        );

        session
    }

    /// Look up the record for a session
    pub async fn handle(&self, id: Uuid) -> Result<SessionHandle, UploadError> {
        let sessions = self.inner.sessions.read().await;
        sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| UploadError::SessionNotFound(id.to_string()))
    }

    /// Take the per-session lock, whatever the session's status.
    ///
    /// Waits for any commit already in flight on the same session.
    pub async fn lock(&self, id: Uuid) -> Result<SessionGuard, UploadError> {
        let handle = self.handle(id).await?;
        Ok(handle.lock_owned().await)
    }

    /// Take the per-session lock, rejecting expired sessions
    pub async fn lock_live(&self, id: Uuid) -> Result<SessionGuard, UploadError> {
        let guard = self.lock(id).await?;
        if guard.status == SessionStatus::Expired {
            return Err(UploadError::SessionExpired(id.to_string()));
        }
        Ok(guard)
    }

    /// Snapshot of a live session
    pub async fn get(&self, id: Uuid) -> Result<UploadSession, UploadError> {
        let guard = self.lock_live(id).await?;
        Ok(guard.clone())
    }

    /// Snapshot of a session in any status, expired included
    pub async fn get_any(&self, id: Uuid) -> Result<UploadSession, UploadError> {
        let guard = self.lock(id).await?;
        Ok(guard.clone())
    }

    /// Record a new received-byte count
    pub async fn advance(&self, id: Uuid, received: u64) -> Result<UploadSession, UploadError> {
        let mut guard = self.lock_live(id).await?;
        if guard.is_terminal() {
            return Err(UploadError::InvalidState {
                id,
                status: guard.status,
            });
        }
        if guard.status == SessionStatus::Pending && received > 0 {
            guard.transition(SessionStatus::Active)?;
        }
        guard.advance_to(received)?;
        Ok(guard.clone())
    }

    /// Mark a session expired
    pub async fn expire(&self, id: Uuid) -> Result<UploadSession, UploadError> {
        let mut guard = self.lock(id).await?;
        if guard.status == SessionStatus::Active {
            guard.transition(SessionStatus::Paused)?;
        }
        guard.transition(SessionStatus::Expired)?;

        tracing::info!(session_id = %id, received = guard.received, "Upload session expired");

        Ok(guard.clone())
    }

    /// Pause an active session (client abort or connection loss)
    pub async fn pause(&self, id: Uuid) -> Result<UploadSession, UploadError> {
        let mut guard = self.lock_live(id).await?;
        match guard.status {
            SessionStatus::Active => {
                guard.transition(SessionStatus::Paused)?;
                guard.touch();
                tracing::debug!(session_id = %id, offset = guard.received, "Upload session paused");
            }
            // Nothing has been sent yet, or already paused
            SessionStatus::Pending | SessionStatus::Paused => {}
            status => return Err(UploadError::InvalidState { id, status }),
        }
        Ok(guard.clone())
    }

    /// Resume a paused session on a resume handshake
    pub async fn resume(&self, id: Uuid) -> Result<UploadSession, UploadError> {
        let mut guard = self.lock_live(id).await?;
        if guard.status == SessionStatus::Paused {
            guard.transition(SessionStatus::Active)?;
            tracing::debug!(session_id = %id, offset = guard.received, "Upload session resumed");
        }
        guard.touch();
        Ok(guard.clone())
    }

    /// Mark a fully received session complete
    pub async fn complete(
        &self,
        id: Uuid,
        object: StorageObject,
    ) -> Result<UploadSession, UploadError> {
        let mut guard = self.lock_live(id).await?;
        guard.complete(object)?;
        Ok(guard.clone())
    }

    /// Mark a session failed
    pub async fn fail(&self, id: Uuid, reason: &str) -> Result<UploadSession, UploadError> {
        let mut guard = self.lock_live(id).await?;
        guard.fail(reason)?;

        tracing::warn!(session_id = %id, reason = %reason, "Upload session failed");

        Ok(guard.clone())
    }

    /// Remove a session from the registry
    pub async fn remove(&self, id: Uuid) -> Result<UploadSession, UploadError> {
        let handle = {
            let mut sessions = self.inner.sessions.write().await;
            sessions
                .remove(&id)
                .ok_or_else(|| UploadError::SessionNotFound(id.to_string()))?
        };

        let session = handle.lock().await.clone();
        tracing::info!(session_id = %id, status = %session.status, "Upload session removed");
        Ok(session)
    }

    /// Remove a session whose lock the caller already holds
    pub async fn remove_locked(&self, guard: &SessionGuard) -> Result<UploadSession, UploadError> {
        let id = guard.id;
        self.inner
            .sessions
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| UploadError::SessionNotFound(id.to_string()))?;

        tracing::info!(session_id = %id, status = %guard.status, "Upload session removed");
        Ok((**guard).clone())
    }

    // ========================================================================
    // Query Methods
    // ========================================================================

    /// Get session count
    pub async fn len(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Count sessions in a given status
    pub async fn count_with_status(&self, status: SessionStatus) -> usize {
        let mut count = 0;
        for (_, handle) in self.handles().await {
            if handle.lock().await.status == status {
                count += 1;
            }
        }
        count
    }

    async fn handles(&self) -> Vec<(Uuid, SessionHandle)> {
        let sessions = self.inner.sessions.read().await;
        sessions.iter().map(|(id, h)| (*id, h.clone())).collect()
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Apply the inactivity window to every session.
    ///
    /// Quiet `active` sessions are treated as lost connections and paused;
    /// `pending` and `paused` sessions idle past the window expire; terminal
    /// records idle past `retention` are dropped. Sessions whose lock is held
    /// have a commit in flight and are skipped.
    pub async fn sweep(&self, window: chrono::Duration, retention: chrono::Duration) -> SweepReport {
        let now = Utc::now();
        let mut report = SweepReport::default();

        for (id, handle) in self.handles().await {
            let Ok(mut session) = handle.try_lock() else {
                continue;
            };

            if session.is_terminal() {
                if now > session.last_activity + retention {
                    report.purged.push(id);
                    if session.status != SessionStatus::Complete {
                        report.abandoned.push(id);
                    }
                }
                continue;
            }

            if !session.is_idle(now, window) {
                continue;
            }

            if session.status == SessionStatus::Active
                && session.transition(SessionStatus::Paused).is_ok()
            {
                report.paused.push(id);
            }

            if session.transition(SessionStatus::Expired).is_ok() {
                report.expired.push(id);
            }
        }

        if !report.purged.is_empty() {
            let mut sessions = self.inner.sessions.write().await;
            for id in &report.purged {
                sessions.remove(id);
            }
        }

        if !report.expired.is_empty() || !report.purged.is_empty() {
            tracing::info!(
                paused = report.paused.len(),
                expired = report.expired.len(),
                purged = report.purged.len(),
                "Swept upload sessions"
            );
        }

        report
    }
}

/// Parse a session ID, treating malformed IDs as unknown sessions
pub fn parse_id(id: &str) -> Result<Uuid, UploadError> {
    Uuid::parse_str(id).map_err(|_| UploadError::SessionNotFound(id.to_string()))
}

// ============================================================================
// Tests
// ============================================================================
