//! Upload status routes
//!
//! Endpoints:
//! - GET /api/v1/uploads/completed - Recently finished uploads
//! - GET /api/v1/uploads/:id - Session status

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::state::AppState;
use crate::upload::registry::parse_id;
use crate::upload::{CompletedUpload, SessionStatus, StorageObject};

/// Create the upload status router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/completed", get(list_completed))
        .route("/:id", get(get_session))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionStatusResponse {
    session_id: String,
    upload_url: String,
    status: SessionStatus,
    declared_size: u64,
    received: u64,
    chunks_committed: u64,
    progress: f64,
    object_name: String,
    metadata: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    object: Option<StorageObject>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

/// GET /api/v1/uploads/:id
///
/// Expired sessions stay visible here until they are purged.
async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionStatusResponse>> {
    let id = parse_id(&id)?;
    let session = state.service().status(id).await?;

    let progress = session.progress();
    let expires_at = (!session.is_terminal()).then(|| state.service().expires_at(&session));
    let metadata = session
        .metadata
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    Ok(Json(SessionStatusResponse {
        session_id: session.id.to_string(),
        upload_url: state.upload_url(session.id),
        status: session.status,
        declared_size: session.declared_size,
        received: session.received,
        chunks_committed: session.chunks_committed,
        progress,
        object_name: session.object_name,
        metadata,
        failure: session.failure,
        object: session.object,
        created_at: session.created_at,
        last_activity: session.last_activity,
        expires_at,
    }))
}

#[derive(Serialize)]
struct CompletedResponse {
    uploads: Vec<CompletedUpload>,
    total: usize,
}

/// GET /api/v1/uploads/completed
async fn list_completed(State(state): State<AppState>) -> Json<CompletedResponse> {
    let uploads = state.completed().list();
    let total = uploads.len();
    Json(CompletedResponse { uploads, total })
}
