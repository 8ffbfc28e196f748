//! Route modules for the Tusk server

pub mod health;
pub mod tus;
pub mod uploads;

use axum::{http::header, routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the application router
pub fn app(state: AppState) -> Router {
    // Browsers only let clients read headers that are listed here
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            header::LOCATION,
            tus::TUS_RESUMABLE,
            tus::TUS_VERSION_HEADER,
            tus::TUS_EXTENSION,
            tus::TUS_MAX_SIZE,
            tus::UPLOAD_OFFSET,
            tus::UPLOAD_LENGTH,
            tus::UPLOAD_METADATA,
            tus::UPLOAD_EXPIRES,
        ]);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/health", get(health::health_check))
        .merge(tus::router())
        .nest("/api/v1/uploads", uploads::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
