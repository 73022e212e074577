//! Health check endpoints.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Basic health check (is the server running?)
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct ReadyResponse {
    status: &'static str,
    backend: &'static str,
}

/// Readiness check (are all backing stores reachable?)
pub async fn ready_check(State(state): State<AppState>) -> Result<Json<ReadyResponse>, StatusCode> {
    match state.orchestrator.ready().await {
        Ok(()) => Ok(Json(ReadyResponse {
            status: "ready",
            backend: backend_name(&state),
        })),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

fn backend_name(state: &AppState) -> &'static str {
    match state.config.backend {
        crate::config::Backend::Redis => "redis",
        crate::config::Backend::Memory => "memory",
    }
}
