//! Client transport abstraction
//!
//! The transfer engine only speaks to the server through [`UploadTransport`],
//! so the same engine drives a remote server over HTTP or an in-process
//! [`UploadService`](crate::upload::UploadService).

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::upload::UploadMetadata;

/// A server-side upload as seen by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUpload {
    pub id: Uuid,
    /// Absolute upload URL, usable for resuming later
    pub url: String,
}

impl RemoteUpload {
    /// Recover an upload from its URL. The id is the last path segment.
    pub fn from_url(url: &str) -> Result<Self, TransportError> {
        let trimmed = url.trim_end_matches('/');
        let segment = trimmed.rsplit('/').next().unwrap_or_default();
        let id = Uuid::parse_str(segment).map_err(|_| TransportError::Rejected {
            status: 404,
            message: format!("Not an upload URL: {}", url),
        })?;

        Ok(Self {
            id,
            url: trimmed.to_string(),
        })
    }
}

/// Server-reported progress of an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteOffset {
    pub offset: u64,
    pub length: u64,
}

/// Transport errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The chunk did not start at the server's offset
    #[error("Offset mismatch (server offset: {server_offset:?})")]
    OffsetMismatch { server_offset: Option<u64> },

    /// Connection reset, timeout, interrupted body
    #[error("Transport failure: {0}")]
    Transient(String),

    /// The server refused the request
    #[error("Server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl TransportError {
    /// Whether the same request may succeed after a delay
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::OffsetMismatch { .. } | Self::Transient(_) => true,
            Self::Rejected { status, .. } => *status >= 500,
        }
    }
}

/// Client side of the upload protocol
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Declare a new upload
    async fn create(
        &self,
        length: u64,
        metadata: &UploadMetadata,
    ) -> Result<RemoteUpload, TransportError>;

    /// Query the authoritative offset (resumes a paused upload)
    async fn offset(&self, upload: &RemoteUpload) -> Result<RemoteOffset, TransportError>;

    /// Send one chunk at `offset`, returning the new offset
    async fn send_chunk(
        &self,
        upload: &RemoteUpload,
        offset: u64,
        data: Bytes,
    ) -> Result<u64, TransportError>;

    /// Ask the server to pause the upload
    async fn pause(&self, upload: &RemoteUpload) -> Result<(), TransportError>;

    /// Report that the client gave up on the upload
    async fn fail(&self, upload: &RemoteUpload, reason: &str) -> Result<(), TransportError>;

    /// Terminate the upload and discard its data
    async fn terminate(&self, upload: &RemoteUpload) -> Result<(), TransportError>;
}
