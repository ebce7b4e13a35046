//! HTTP request handlers.

pub mod buckets;
pub mod lifecycle;
pub mod list;
pub mod objects;

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use silo_metadata::MetadataStore;

/// `GET /healthz` — liveness probe.
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// `GET /readyz` — readiness probe: checks metadata connectivity.
pub async fn ready(State(state): State<AppState>) -> StatusCode {
    match state.metadata.health_check().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Fallback for unsupported methods on known routes.
pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}
