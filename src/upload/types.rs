//! Upload types for the resumable upload protocol

use std::collections::BTreeMap;

use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::naming;

// ============================================================================
// Constants
// ============================================================================

/// Protocol version spoken by the server and the client
pub const TUS_VERSION: &str = "1.0.0";

/// Protocol extensions advertised on OPTIONS
pub const TUS_EXTENSIONS: &str = "creation,termination,expiration";

/// Default chunk size: 10MB
pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// Largest PATCH body the server buffers: 64MB
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Maximum upload size: 250GB
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 250 * 1024 * 1024 * 1024;

/// Inactivity window before an unfinished session expires: 24 hours
pub const DEFAULT_EXPIRY_SECS: u64 = 24 * 60 * 60;

// ============================================================================
// Metadata
// ============================================================================

/// Key/value metadata declared by the client at upload initiation.
///
/// Travels in the `Upload-Metadata` header as comma separated
/// `key base64(value)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pairs: BTreeMap<String, String>,
}

impl UploadMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.insert(key.into(), value.into());
        self
    }

    /// Original file name (`filename`, falling back to `name`)
    pub fn filename(&self) -> Option<&str> {
        self.get("filename").or_else(|| self.get("name"))
    }

    /// Declared MIME type (`filetype`, falling back to `type`)
    pub fn filetype(&self) -> Option<&str> {
        self.get("filetype").or_else(|| self.get("type"))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Decode an `Upload-Metadata` header value
    pub fn parse_header(value: &str) -> Result<Self, UploadError> {
        let mut pairs = BTreeMap::new();

        for item in value.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }

            let mut parts = item.splitn(2, ' ');
            let key = parts.next().unwrap_or_default();
            if key.is_empty() {
                return Err(UploadError::InvalidRequest(
                    "Upload-Metadata contains an empty key".to_string(),
                ));
            }

            let value = match parts.next().map(str::trim) {
                Some(encoded) if !encoded.is_empty() => {
                    let raw = base64::engine::general_purpose::STANDARD
                        .decode(encoded)
                        .map_err(|e| {
                            UploadError::InvalidRequest(format!(
                                "Upload-Metadata value for '{}' is not base64: {}",
                                key, e
                            ))
                        })?;
                    String::from_utf8(raw).map_err(|_| {
                        UploadError::InvalidRequest(format!(
                            "Upload-Metadata value for '{}' is not UTF-8",
                            key
                        ))
                    })?
                }
                _ => String::new(),
            };

            if pairs.insert(key.to_string(), value).is_some() {
                return Err(UploadError::InvalidRequest(format!(
                    "Upload-Metadata key '{}' is repeated",
                    key
                )));
            }
        }

        Ok(Self { pairs })
    }

    /// Encode as an `Upload-Metadata` header value
    pub fn to_header(&self) -> String {
        self.pairs
            .iter()
            .map(|(key, value)| {
                if value.is_empty() {
                    key.clone()
                } else {
                    format!(
                        "{} {}",
                        key,
                        base64::engine::general_purpose::STANDARD.encode(value)
                    )
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

// ============================================================================
// Chunk
// ============================================================================

/// One contiguous byte range sent in one request
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Offset of the first byte
    pub offset: u64,

    /// Chunk content
    pub data: Bytes,

    /// Position of this chunk in the session's commit sequence
    pub sequence: u64,
}

impl Chunk {
    pub fn new(offset: u64, data: Bytes, sequence: u64) -> Self {
        Self {
            offset,
            data,
            sequence,
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Exclusive end of the byte range
    pub fn end(&self) -> u64 {
        self.offset + self.len()
    }
}

// ============================================================================
// Storage Object
// ============================================================================

/// The durable artifact produced once a session completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageObject {
    /// Backend-specific location (relative path or object key)
    pub key: String,

    /// Final object name
    pub name: String,

    /// Final size in bytes
    pub size: u64,

    /// SHA-256 of the content, hex encoded
    pub sha256: String,

    /// MIME type declared at upload initiation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Session Types
// ============================================================================

/// Upload session state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    /// Unique session ID
    pub id: Uuid,

    /// Total size declared at initiation
    pub declared_size: u64,

    /// Bytes durably received so far
    pub received: u64,

    /// Number of chunks committed
    pub chunks_committed: u64,

    /// Metadata declared at initiation
    pub metadata: UploadMetadata,

    /// Name the finalized object will be stored under
    pub object_name: String,

    /// Session creation time (the upload start)
    pub created_at: DateTime<Utc>,

    /// Last time a client touched this session
    pub last_activity: DateTime<Utc>,

    /// Current status
    pub status: SessionStatus,

    /// Reason for the `failed` status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,

    /// Stored object, once complete
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<StorageObject>,
}

impl UploadSession {
    /// Create a new upload session
    pub fn new(declared_size: u64, metadata: UploadMetadata) -> Self {
        let now = Utc::now();
        let object_name = naming::object_name(now.timestamp_millis(), &metadata);

        Self {
            id: Uuid::new_v4(),
            declared_size,
            received: 0,
            chunks_committed: 0,
            metadata,
            object_name,
            created_at: now,
            last_activity: now,
            status: SessionStatus::Pending,
            failure: None,
            object: None,
        }
    }

    /// Bytes still expected
    pub fn remaining(&self) -> u64 {
        self.declared_size - self.received
    }

    /// Check if every declared byte has been received
    pub fn is_fully_received(&self) -> bool {
        self.received == self.declared_size
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Time after which an unfinished session expires
    pub fn expires_at(&self, window: chrono::Duration) -> DateTime<Utc> {
        self.last_activity + window
    }

    /// Check if the session has been idle longer than the window
    pub fn is_idle(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        now > self.expires_at(window)
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Calculate progress percentage
    pub fn progress(&self) -> f64 {
        if self.declared_size == 0 {
            return 100.0;
        }
        (self.received as f64 / self.declared_size as f64) * 100.0
    }

    /// Move to another status, enforcing the session state machine
    pub fn transition(&mut self, to: SessionStatus) -> Result<(), UploadError> {
        if self.status == to {
            return Ok(());
        }

        if to == SessionStatus::Complete
            && self.status == SessionStatus::Pending
            && self.declared_size != 0
        {
            return Err(UploadError::InvalidState {
                id: self.id,
                status: self.status,
            });
        }

        if !self.status.can_transition_to(to) {
            return Err(UploadError::InvalidState {
                id: self.id,
                status: self.status,
            });
        }

        self.status = to;
        Ok(())
    }

    /// Record a new received-byte count.
    ///
    /// The count never moves backwards and never passes the declared size.
    pub fn advance_to(&mut self, received: u64) -> Result<(), UploadError> {
        if received < self.received {
            return Err(UploadError::OffsetMismatch {
                expected: self.received,
                actual: received,
            });
        }
        if received > self.declared_size {
            return Err(UploadError::ChunkOverrun {
                end: received,
                declared: self.declared_size,
            });
        }

        self.received = received;
        self.touch();
        Ok(())
    }

    /// Seal the session with its stored object
    pub fn complete(&mut self, object: StorageObject) -> Result<(), UploadError> {
        if !self.is_fully_received() {
            return Err(UploadError::IncompleteUpload {
                received: self.received,
                declared: self.declared_size,
            });
        }
        self.transition(SessionStatus::Complete)?;
        self.object = Some(object);
        self.touch();
        Ok(())
    }

    /// Mark the session failed with a reason
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), UploadError> {
        self.transition(SessionStatus::Failed)?;
        self.failure = Some(reason.into());
        Ok(())
    }
}

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, no chunk received yet
    Pending,
    /// Receiving chunks
    Active,
    /// Interrupted, resumable
    Paused,
    /// Finalized into a stored object
    Complete,
    /// Unrecoverable error
    Failed,
    /// Inactivity window elapsed
    Expired,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Expired)
    }

    /// Allowed edges of the state machine.
    ///
    /// `Pending -> Complete` is only valid for zero-length uploads, which
    /// `UploadSession::transition` checks separately.
    pub fn can_transition_to(self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, to),
            (Pending, Active)
                | (Pending, Complete)
                | (Pending, Failed)
                | (Pending, Expired)
                | (Active, Paused)
                | (Active, Complete)
                | (Active, Failed)
                | (Paused, Active)
                | (Paused, Failed)
                | (Paused, Expired)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("Offset mismatch: expected {expected}, got {actual}")]
    OffsetMismatch { expected: u64, actual: u64 },

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Upload too large: {size} bytes (max: {max})")]
    SizeLimitExceeded { size: u64, max: u64 },

    #[error("Incomplete upload: received {received} of {declared} bytes")]
    IncompleteUpload { received: u64, declared: u64 },

    #[error("Chunk ends at {end}, past the declared size {declared}")]
    ChunkOverrun { end: u64, declared: u64 },

    #[error("Chunk of {len} bytes exceeds the {max} byte chunk limit")]
    ChunkTooLarge { len: u64, max: u64 },

    #[error("Session {id} is {status}")]
    InvalidState { id: Uuid, status: SessionStatus },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("Storage error: {0}")]
    StorageBackendError(String),
}

impl UploadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::SessionExpired(_) => StatusCode::GONE,
            Self::OffsetMismatch { .. } => StatusCode::CONFLICT,
            Self::TransportFailure(_) => StatusCode::BAD_REQUEST,
            Self::SizeLimitExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::IncompleteUpload { .. } => StatusCode::CONFLICT,
            Self::ChunkOverrun { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ChunkTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidState { .. } => StatusCode::LOCKED,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnsupportedContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::StorageBackendError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::SessionExpired(_) => "SESSION_EXPIRED",
            Self::OffsetMismatch { .. } => "OFFSET_MISMATCH",
            Self::TransportFailure(_) => "TRANSPORT_FAILURE",
            Self::SizeLimitExceeded { .. } => "SIZE_LIMIT_EXCEEDED",
            Self::IncompleteUpload { .. } => "INCOMPLETE_UPLOAD",
            Self::ChunkOverrun { .. } => "CHUNK_OVERRUN",
            Self::ChunkTooLarge { .. } => "CHUNK_TOO_LARGE",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::UnsupportedContentType(_) => "UNSUPPORTED_CONTENT_TYPE",
            Self::StorageBackendError(_) => "STORAGE_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_header_roundtrip() {
        let metadata = UploadMetadata::new()
            .with("filename", "holiday.mp4")
            .with("filetype", "video/mp4")
            .with("is_confidential", "");

        let header = metadata.to_header();
        assert!(header.contains("filename aG9saWRheS5tcDQ="));
        assert!(header.contains("is_confidential"));

        let parsed = UploadMetadata::parse_header(&header).unwrap();
        assert_eq!(parsed, metadata);
        assert_eq!(parsed.filename(), Some("holiday.mp4"));
        assert_eq!(parsed.filetype(), Some("video/mp4"));
    }

    #[test]
    fn test_metadata_falls_back_to_name_and_type() {
        let metadata = UploadMetadata::new()
            .with("name", "cat.png")
            .with("type", "image/png");
        assert_eq!(metadata.filename(), Some("cat.png"));
        assert_eq!(metadata.filetype(), Some("image/png"));
    }

    #[test]
    fn test_metadata_rejects_bad_values() {
        assert!(UploadMetadata::parse_header("filename !!!").is_err());
        assert!(UploadMetadata::parse_header("a YQ==,a Yg==").is_err());
        assert!(UploadMetadata::parse_header(" YQ==").is_ok()); // trimmed into a bare key
        assert!(UploadMetadata::parse_header("").unwrap().is_empty());
    }

    #[test]
    fn test_state_machine_edges() {
        use SessionStatus::*;

        assert!(Pending.can_transition_to(Active));
        assert!(Active.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Active));
        assert!(Paused.can_transition_to(Expired));
        assert!(!Active.can_transition_to(Expired));
        assert!(!Complete.can_transition_to(Active));
        assert!(!Failed.can_transition_to(Paused));
        assert!(!Expired.can_transition_to(Pending));
    }

    #[test]
    fn test_pending_to_complete_only_for_empty_upload() {
        let mut session = UploadSession::new(10, UploadMetadata::new());
        assert!(session.transition(SessionStatus::Complete).is_err());

        let mut empty = UploadSession::new(0, UploadMetadata::new());
        empty.transition(SessionStatus::Complete).unwrap();
        assert_eq!(empty.status, SessionStatus::Complete);
    }

    #[test]
    fn test_advance_is_monotonic_and_bounded() {
        let mut session = UploadSession::new(100, UploadMetadata::new());

        session.advance_to(40).unwrap();
        assert_eq!(session.received, 40);

        assert!(matches!(
            session.advance_to(30),
            Err(UploadError::OffsetMismatch { .. })
        ));
        assert!(matches!(
            session.advance_to(101),
            Err(UploadError::ChunkOverrun { .. })
        ));
        assert_eq!(session.received, 40);

        session.advance_to(100).unwrap();
        assert!(session.is_fully_received());
        assert_eq!(session.progress(), 100.0);
    }

    #[test]
    fn test_chunk_range() {
        let chunk = Chunk::new(10, Bytes::from_static(b"abcd"), 2);
        assert_eq!(chunk.len(), 4);
        assert_eq!(chunk.end(), 14);
        assert!(!chunk.is_empty());
    }
}
