//! Error types for the Tusk server

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::upload::types::{UploadError, TUS_VERSION};

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("S3 error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("S3 SDK error: {0}")]
    SdkError(String),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Storage(e) => {
                tracing::error!("Storage error: {}", e);
                match e {
                    StorageError::ObjectNotFound(key) => (
                        StatusCode::NOT_FOUND,
                        "NOT_FOUND",
                        format!("Object not found: {}", key),
                    ),
                    StorageError::SdkError(_) => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "STORAGE_ERROR",
                        "Storage error".to_string(),
                    ),
                }
            }
            AppError::Upload(e) => {
                let status = e.status_code();
                if status.is_server_error() {
                    tracing::error!(code = e.code(), "Upload error: {}", e);
                } else {
                    tracing::debug!(code = e.code(), "Upload rejected: {}", e);
                }
                (status, e.code(), e.to_string())
            }
            AppError::Config(e) => {
                tracing::error!("Configuration error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_ERROR",
                    "Server misconfigured".to_string(),
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        let body = Json(ErrorResponse {
            error: message,
            code,
            details: if cfg!(debug_assertions) && status.is_server_error() {
                Some(self.to_string())
            } else {
                None
            },
        });

        let mut response = (status, body).into_response();
        response
            .headers_mut()
            .insert("Tus-Resumable", HeaderValue::from_static(TUS_VERSION));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_error_status() {
        let response = AppError::from(UploadError::OffsetMismatch {
            expected: 10,
            actual: 5,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(response.headers()["Tus-Resumable"], TUS_VERSION);

        let response = AppError::from(UploadError::SessionExpired("x".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::GONE);
    }

    #[test]
    fn test_storage_error_status() {
        let response =
            AppError::from(StorageError::ObjectNotFound("objects/a".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = AppError::from(StorageError::SdkError("boom".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = AppError::Internal("bad header".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()["Tus-Resumable"], TUS_VERSION);
    }
}
