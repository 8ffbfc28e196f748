//! Resumable upload protocol routes
//!
//! Endpoints:
//! - OPTIONS /files - Server capabilities
//! - POST /files - Create an upload
//! - HEAD /files/:id - Query the upload offset (resume handshake)
//! - PATCH /files/:id - Append a chunk at the current offset
//! - DELETE /files/:id - Terminate an upload
//! - POST /files/:id/pause - Client-initiated pause
//! - POST /files/:id/fail - Client gave up after exhausting retries

use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{head, post},
    Json, Router,
};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::upload::registry::parse_id;
use crate::upload::{Completion, UploadError, UploadMetadata, UploadSession, TUS_EXTENSIONS, TUS_VERSION};

pub const TUS_RESUMABLE: HeaderName = HeaderName::from_static("tus-resumable");
pub const TUS_VERSION_HEADER: HeaderName = HeaderName::from_static("tus-version");
pub const TUS_EXTENSION: HeaderName = HeaderName::from_static("tus-extension");
pub const TUS_MAX_SIZE: HeaderName = HeaderName::from_static("tus-max-size");
pub const UPLOAD_OFFSET: HeaderName = HeaderName::from_static("upload-offset");
pub const UPLOAD_LENGTH: HeaderName = HeaderName::from_static("upload-length");
pub const UPLOAD_DEFER_LENGTH: HeaderName = HeaderName::from_static("upload-defer-length");
pub const UPLOAD_METADATA: HeaderName = HeaderName::from_static("upload-metadata");
pub const UPLOAD_EXPIRES: HeaderName = HeaderName::from_static("upload-expires");

/// Content type every PATCH body must declare
pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

// ============================================================================
// Router
// ============================================================================

/// Create the upload protocol router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/files", post(create_upload).options(capabilities))
        .route(
            "/files/:id",
            head(offset).patch(upload_chunk).delete(terminate),
        )
        .route("/files/:id/pause", post(pause))
        .route("/files/:id/fail", post(fail))
        .layer(middleware::from_fn(tus_resumable))
}

/// Enforce the protocol version on requests and stamp it on responses
async fn tus_resumable(request: Request, next: Next) -> Response {
    if request.method() != Method::OPTIONS {
        let version = request.headers().get(TUS_RESUMABLE);
        if version.map(HeaderValue::as_bytes) != Some(TUS_VERSION.as_bytes()) {
            tracing::debug!(
                method = %request.method(),
                uri = %request.uri(),
                version = ?version,
                "Rejected request with unsupported protocol version"
            );
            return (
                StatusCode::PRECONDITION_FAILED,
                [
                    (TUS_RESUMABLE, HeaderValue::from_static(TUS_VERSION)),
                    (TUS_VERSION_HEADER, HeaderValue::from_static(TUS_VERSION)),
                ],
            )
                .into_response();
        }
    }

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(TUS_RESUMABLE, HeaderValue::from_static(TUS_VERSION));
    response
}

// ============================================================================
// Handlers
// ============================================================================

/// OPTIONS /files
async fn capabilities(State(state): State<AppState>) -> Response {
    let max_size = state.service().limits().max_size;

    (
        StatusCode::NO_CONTENT,
        [
            (TUS_VERSION_HEADER, HeaderValue::from_static(TUS_VERSION)),
            (TUS_EXTENSION, HeaderValue::from_static(TUS_EXTENSIONS)),
            (TUS_MAX_SIZE, HeaderValue::from(max_size)),
        ],
    )
        .into_response()
}

/// POST /files
///
/// Declares the total size and metadata. Responds with the upload URL.
async fn create_upload(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    let declared_size = match header_u64(&headers, &UPLOAD_LENGTH)? {
        Some(size) => size,
        None if headers.contains_key(UPLOAD_DEFER_LENGTH) => {
            return Err(UploadError::InvalidRequest(
                "Deferred upload length is not supported".to_string(),
            )
            .into())
        }
        None => {
            return Err(
                UploadError::InvalidRequest("Missing Upload-Length header".to_string()).into(),
            )
        }
    };

    let metadata = match header_str(&headers, &UPLOAD_METADATA)? {
        Some(value) => UploadMetadata::parse_header(value)?,
        None => UploadMetadata::new(),
    };

    let created = state
        .service()
        .create_upload(declared_size, metadata)
        .await?;
    let session = &created.session;
    let location = state.upload_url(session.id);

    tracing::info!(
        session_id = %session.id,
        declared_size = declared_size,
        filename = ?session.metadata.filename(),
        "Upload created"
    );

    let mut response = match &created.completion {
        Some(completion) => completion_response(StatusCode::CREATED, completion),
        None => StatusCode::CREATED.into_response(),
    };

    let headers = response.headers_mut();
    headers.insert(header::LOCATION, header_value(&location)?);
    headers.insert(UPLOAD_OFFSET, HeaderValue::from(session.received));
    if !session.is_terminal() {
        headers.insert(
            UPLOAD_EXPIRES,
            header_value(&http_date(state.service().expires_at(session)))?,
        );
    }

    Ok(response)
}

/// HEAD /files/:id
///
/// Reports the authoritative offset. Resumes a paused session.
async fn offset(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response> {
    let id = parse_id(&id)?;
    let session = state.service().offset(id).await?;

    let mut response = StatusCode::OK.into_response();
    let headers = response.headers_mut();
    headers.insert(UPLOAD_OFFSET, HeaderValue::from(session.received));
    headers.insert(UPLOAD_LENGTH, HeaderValue::from(session.declared_size));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    if !session.metadata.is_empty() {
        headers.insert(UPLOAD_METADATA, header_value(&session.metadata.to_header())?);
    }
    insert_expiry(&state, &session, headers)?;

    Ok(response)
}

enum ChunkRead {
    /// Body ran past the limit; carries the bytes seen so far
    Oversized(u64),
    Broken(axum::Error),
}

/// Buffer a chunk body, stopping as soon as it exceeds `limit`
async fn read_chunk(body: Body, limit: u64) -> std::result::Result<Bytes, ChunkRead> {
    let mut stream = body.into_data_stream();
    let mut buf = BytesMut::new();

    while let Some(frame) = stream.next().await {
        let frame = frame.map_err(ChunkRead::Broken)?;
        let len = buf.len() as u64 + frame.len() as u64;
        if len > limit {
            return Err(ChunkRead::Oversized(len));
        }
        buf.extend_from_slice(&frame);
    }

    Ok(buf.freeze())
}

/// PATCH /files/:id
///
/// The body is exactly one chunk starting at `Upload-Offset`.
async fn upload_chunk(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response> {
    let id = parse_id(&id)?;

    let content_type = header_str(&headers, &header::CONTENT_TYPE)?.unwrap_or_default();
    if content_type != OFFSET_OCTET_STREAM {
        return Err(UploadError::UnsupportedContentType(content_type.to_string()).into());
    }

    let offset = header_u64(&headers, &UPLOAD_OFFSET)?.ok_or_else(|| {
        AppError::from(UploadError::InvalidRequest(
            "Missing Upload-Offset header".to_string(),
        ))
    })?;

    let session = state.service().status(id).await?;
    let remaining = session.declared_size.saturating_sub(offset);
    let max_chunk = state.config().upload.max_chunk_size;
    let too_large = |len: u64| -> AppError {
        if len > remaining {
            UploadError::ChunkOverrun {
                end: offset.saturating_add(len),
                declared: session.declared_size,
            }
            .into()
        } else {
            UploadError::ChunkTooLarge {
                len,
                max: max_chunk,
            }
            .into()
        }
    };

    let limit = remaining.min(max_chunk);
    if let Some(length) = header_u64(&headers, &header::CONTENT_LENGTH)? {
        if length > limit {
            return Err(too_large(length));
        }
    }

    let data = match read_chunk(body, limit).await {
        Ok(data) => data,
        Err(ChunkRead::Oversized(len)) => return Err(too_large(len)),
        Err(ChunkRead::Broken(e)) => {
            tracing::warn!(session_id = %id, offset = offset, error = %e, "Chunk body interrupted");
            if let Err(pause_err) = state.service().pause(id).await {
                tracing::debug!(session_id = %id, error = %pause_err, "Could not pause session");
            }
            return Err(UploadError::TransportFailure(e.to_string()).into());
        }
    };

    let outcome = state.service().write_chunk(id, offset, data).await?;
    let session = &outcome.session;

    let mut response = match &outcome.completion {
        Some(completion) => completion_response(StatusCode::NO_CONTENT, completion),
        None => StatusCode::NO_CONTENT.into_response(),
    };
    let headers = response.headers_mut();
    headers.insert(UPLOAD_OFFSET, HeaderValue::from(session.received));
    insert_expiry(&state, session, headers)?;

    Ok(response)
}

/// DELETE /files/:id
async fn terminate(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode> {
    let id = parse_id(&id)?;
    state.service().terminate(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /files/:id/pause
async fn pause(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response> {
    let id = parse_id(&id)?;
    let session = state.service().pause(id).await?;

    let mut response = StatusCode::NO_CONTENT.into_response();
    response
        .headers_mut()
        .insert(UPLOAD_OFFSET, HeaderValue::from(session.received));
    Ok(response)
}

#[derive(Debug, Deserialize)]
struct FailRequest {
    reason: Option<String>,
}

/// POST /files/:id/fail
async fn fail(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Option<Json<FailRequest>>,
) -> Result<StatusCode> {
    let id = parse_id(&id)?;
    let reason = request
        .and_then(|Json(request)| request.reason)
        .unwrap_or_else(|| "Client reported an unrecoverable error".to_string());

    state.service().fail(id, &reason).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Helpers
// ============================================================================

/// Response for the request that completed a session.
///
/// A completion hook may override the status and body.
fn completion_response(default: StatusCode, completion: &Completion) -> Response {
    match &completion.response {
        Some(hook) => (
            hook.status,
            [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
            hook.body.clone(),
        )
            .into_response(),
        None => default.into_response(),
    }
}

fn insert_expiry(state: &AppState, session: &UploadSession, headers: &mut HeaderMap) -> Result<()> {
    if !session.is_terminal() {
        headers.insert(
            UPLOAD_EXPIRES,
            header_value(&http_date(state.service().expires_at(session)))?,
        );
    }
    Ok(())
}

/// RFC 7231 HTTP-date
pub fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Result<Option<&'a str>> {
    headers
        .get(name)
        .map(|value| {
            value.to_str().map_err(|_| {
                AppError::from(UploadError::InvalidRequest(format!("Invalid {} header", name)))
            })
        })
        .transpose()
}

fn header_u64(headers: &HeaderMap, name: &HeaderName) -> Result<Option<u64>> {
    header_str(headers, name)?
        .map(|value| {
            value.trim().parse::<u64>().map_err(|_| {
                AppError::from(UploadError::InvalidRequest(format!(
                    "Invalid {} header: {}",
                    name, value
                )))
            })
        })
        .transpose()
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| AppError::Internal(format!("Invalid header value {:?}: {}", value, e)))
}
