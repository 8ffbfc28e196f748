//! Health check endpoints

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::AppState;
use crate::upload::SessionStatus;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub service: &'static str,
    pub storage: &'static str,
    pub active_uploads: usize,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let service = state.service();

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        service: "tusk",
        storage: service.storage().backend_name(),
        active_uploads: service
            .registry()
            .count_with_status(SessionStatus::Active)
            .await,
    })
}
