//! HTTP transport for the upload protocol

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header::HeaderMap, Client, Response, StatusCode, Url};

use super::transport::{RemoteOffset, RemoteUpload, TransportError, UploadTransport};
use crate::upload::{UploadMetadata, TUS_VERSION};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Talks to a server over HTTP
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
}

impl HttpTransport {
    /// Transport for the creation endpoint, e.g. `http://localhost:1080/files`
    pub fn new(endpoint: &str) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Transient(e.to_string()))?;
        Self::with_client(client, endpoint)
    }

    pub fn with_client(client: Client, endpoint: &str) -> Result<Self, TransportError> {
        let endpoint = Url::parse(endpoint).map_err(|e| TransportError::Rejected {
            status: 400,
            message: format!("Invalid endpoint {}: {}", endpoint, e),
        })?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

fn transient(e: reqwest::Error) -> TransportError {
    TransportError::Transient(e.to_string())
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Turn an unexpected status into an error, reading the JSON error body
async fn rejection(response: Response) -> TransportError {
    let status = response.status();
    if status == StatusCode::CONFLICT {
        return TransportError::OffsetMismatch {
            server_offset: header_u64(response.headers(), "upload-offset"),
        };
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Unexpected response")
                .to_string()
        });

    TransportError::Rejected {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn create(
        &self,
        length: u64,
        metadata: &UploadMetadata,
    ) -> Result<RemoteUpload, TransportError> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header("Tus-Resumable", TUS_VERSION)
            .header("Upload-Length", length.to_string());
        if !metadata.is_empty() {
            request = request.header("Upload-Metadata", metadata.to_header());
        }

        let response = request.send().await.map_err(transient)?;
        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let location = response
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| TransportError::Rejected {
                status: response.status().as_u16(),
                message: "Response is missing the Location header".to_string(),
            })?;
        let url = self
            .endpoint
            .join(location)
            .map_err(|e| TransportError::Rejected {
                status: response.status().as_u16(),
                message: format!("Invalid Location {}: {}", location, e),
            })?;

        RemoteUpload::from_url(url.as_str())
    }

    async fn offset(&self, upload: &RemoteUpload) -> Result<RemoteOffset, TransportError> {
        let response = self
            .client
            .head(&upload.url)
            .header("Tus-Resumable", TUS_VERSION)
            .send()
            .await
            .map_err(transient)?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let headers = response.headers();
        match (
            header_u64(headers, "upload-offset"),
            header_u64(headers, "upload-length"),
        ) {
            (Some(offset), Some(length)) => Ok(RemoteOffset { offset, length }),
            _ => Err(TransportError::Transient(
                "Offset response is missing Upload-Offset or Upload-Length".to_string(),
            )),
        }
    }

    async fn send_chunk(
        &self,
        upload: &RemoteUpload,
        offset: u64,
        data: Bytes,
    ) -> Result<u64, TransportError> {
        let response = self
            .client
            .patch(&upload.url)
            .header("Tus-Resumable", TUS_VERSION)
            .header("Upload-Offset", offset.to_string())
            .header("Content-Type", "application/offset+octet-stream")
            .body(data)
            .send()
            .await
            .map_err(transient)?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        header_u64(response.headers(), "upload-offset").ok_or_else(|| {
            TransportError::Transient("Chunk response is missing Upload-Offset".to_string())
        })
    }

    async fn pause(&self, upload: &RemoteUpload) -> Result<(), TransportError> {
        let response = self
            .client
            .post(format!("{}/pause", upload.url))
            .header("Tus-Resumable", TUS_VERSION)
            .send()
            .await
            .map_err(transient)?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }
        Ok(())
    }

    async fn fail(&self, upload: &RemoteUpload, reason: &str) -> Result<(), TransportError> {
        let response = self
            .client
            .post(format!("{}/fail", upload.url))
            .header("Tus-Resumable", TUS_VERSION)
            .json(&serde_json::json!({ "reason": reason }))
            .send()
            .await
            .map_err(transient)?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }
        Ok(())
    }

    async fn terminate(&self, upload: &RemoteUpload) -> Result<(), TransportError> {
        let response = self
            .client
            .delete(&upload.url)
            .header("Tus-Resumable", TUS_VERSION)
            .send()
            .await
            .map_err(transient)?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_endpoint() {
        assert!(matches!(
            HttpTransport::new("not a url"),
            Err(TransportError::Rejected { status: 400, .. })
        ));
    }

    #[test]
    fn test_header_u64() {
        let mut headers = HeaderMap::new();
        headers.insert("upload-offset", "42".parse().unwrap());
        assert_eq!(header_u64(&headers, "upload-offset"), Some(42));
        assert_eq!(header_u64(&headers, "upload-length"), None);
    }
}
