//! In-process transport
//!
//! Drives an [`UploadService`] directly, without HTTP. Useful for embedding
//! the server and client in one process.

use async_trait::async_trait;
use bytes::Bytes;

use super::transport::{RemoteOffset, RemoteUpload, TransportError, UploadTransport};
use crate::upload::{UploadError, UploadMetadata, UploadService};

/// Transport calling an [`UploadService`] in the same process
#[derive(Clone)]
pub struct DirectTransport {
    service: UploadService,
}

impl DirectTransport {
    pub fn new(service: UploadService) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &UploadService {
        &self.service
    }
}

impl From<UploadError> for TransportError {
    fn from(e: UploadError) -> Self {
        match e {
            UploadError::OffsetMismatch { expected, .. } => TransportError::OffsetMismatch {
                server_offset: Some(expected),
            },
            UploadError::TransportFailure(message) => TransportError::Transient(message),
            other => TransportError::Rejected {
                status: other.status_code().as_u16(),
                message: other.to_string(),
            },
        }
    }
}

#[async_trait]
impl UploadTransport for DirectTransport {
    async fn create(
        &self,
        length: u64,
        metadata: &UploadMetadata,
    ) -> Result<RemoteUpload, TransportError> {
        let created = self.service.create_upload(length, metadata.clone()).await?;
        let id = created.session.id;
        Ok(RemoteUpload {
            id,
            url: format!("direct:///files/{}", id),
        })
    }

    async fn offset(&self, upload: &RemoteUpload) -> Result<RemoteOffset, TransportError> {
        let session = self.service.offset(upload.id).await?;
        Ok(RemoteOffset {
            offset: session.received,
            length: session.declared_size,
        })
    }

    async fn send_chunk(
        &self,
        upload: &RemoteUpload,
        offset: u64,
        data: Bytes,
    ) -> Result<u64, TransportError> {
        let outcome = self.service.write_chunk(upload.id, offset, data).await?;
        Ok(outcome.session.received)
    }

    async fn pause(&self, upload: &RemoteUpload) -> Result<(), TransportError> {
        self.service.pause(upload.id).await?;
        Ok(())
    }

    async fn fail(&self, upload: &RemoteUpload, reason: &str) -> Result<(), TransportError> {
        self.service.fail(upload.id, reason).await?;
        Ok(())
    }

    async fn terminate(&self, upload: &RemoteUpload) -> Result<(), TransportError> {
        self.service.terminate(upload.id).await?;
        Ok(())
    }
}
