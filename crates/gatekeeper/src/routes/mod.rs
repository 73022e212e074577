//! HTTP route handlers for Gatekeeper.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::orchestrator::VerificationView;
use crate::reset::ResetGrant;
use crate::state::AppState;
use trustgate_common::UserId;

mod error;
mod flows;
mod health;
mod users;

pub use error::ApiError;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    let mut router = Router::new()
        // Health & Status
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))

        // Verification flows
        .route(
            "/signup/challenge",
            get(flows::signup_status).post(flows::signup_challenge),
        )
        .route("/signup/verify", post(flows::signup_verify))
        .route(
            "/organization-email/challenge",
            get(flows::organization_status).post(flows::organization_challenge),
        )
        .route("/organization-email/verify", post(flows::organization_verify))
        .route("/password-reset/challenge", post(flows::reset_challenge))
        .route("/password-reset/verify", post(flows::reset_verify))

        // Status, capabilities & sessions
        .route("/users/{id}/verification", get(users::verification_status))
        .route("/users/{id}/capabilities/check", post(users::check_capability))
        .route("/users/{id}/session", get(users::current_session))
        .route("/sessions/validate", post(users::validate_session))
        .route("/sessions/public-key", get(users::session_public_key))

        // Admin endpoints (reachable only from the internal network)
        .nest("/admin", admin_routes());

    if state.config.dev.verification_bypass {
        tracing::warn!("⚠️ Development verification bypass mounted at /dev");
        router = router.nest("/dev", dev_routes());
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        // Add shared state
        .with_state(state)
}

/// Admin routes (identity review, reset redemption)
fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/users/{id}/identity/submitted", post(identity_submitted))
        .route("/users/{id}/identity/verified", post(identity_verified))
        .route("/password-reset/redeem", post(redeem_reset))
}

fn dev_routes() -> Router<AppState> {
    Router::new().route(
        "/users/{id}/complete-verification",
        post(dev_complete_verification),
    )
}

// === Admin Handlers ===

async fn identity_submitted(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<VerificationView>, ApiError> {
    let view = state
        .orchestrator
        .mark_identity_submitted(&UserId::new(user_id))
        .await?;
    Ok(Json(view))
}

async fn identity_verified(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<VerificationView>, ApiError> {
    let user_id = UserId::new(user_id);
    tracing::info!(user_id = %user_id, "Identity approved by reviewer");

    let view = state.orchestrator.mark_identity_verified(&user_id).await?;
    Ok(Json(view))
}

#[derive(Deserialize)]
struct RedeemRequest {
    token: String,
}

/// Consumed by the password service right before it changes a password
async fn redeem_reset(
    State(state): State<AppState>,
    Json(payload): Json<RedeemRequest>,
) -> Result<Json<ResetGrant>, ApiError> {
    state
        .orchestrator
        .redeem_reset_grant(&payload.token)
        .await?
        .map(Json)
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::GONE,
                "invalid_grant",
                "Reset grant is unknown, used, or expired.",
            )
        })
}

// === Development Handlers ===

async fn dev_complete_verification(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<VerificationView>, ApiError> {
    let view = state
        .orchestrator
        .complete_verification_for_testing(&UserId::new(user_id))
        .await?;
    Ok(Json(view))
}
