//! Verification status, capability checks, and session endpoints.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use super::error::{ApiError, CallerId};
use crate::orchestrator::{CapabilityDecision, VerificationView};
use crate::session::{IssuedSession, SessionClaims, SessionIssuer};
use crate::state::AppState;
use trustgate_common::{Action, UserId};

pub async fn verification_status(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<VerificationView>, ApiError> {
    let view = state.orchestrator.status(&UserId::new(user_id)).await?;
    Ok(Json(view))
}

#[derive(Deserialize)]
pub struct CapabilityRequest {
    action: Action,
}

#[derive(Serialize)]
pub struct CapabilityResponse {
    action: Action,
    #[serde(flatten)]
    decision: CapabilityDecision,
}

/// A blocked action is a normal 200 answer with the step to complete
pub async fn check_capability(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(payload): Json<CapabilityRequest>,
) -> Result<Json<CapabilityResponse>, ApiError> {
    let decision = state
        .orchestrator
        .check_capability(&UserId::new(user_id), payload.action)
        .await?;

    Ok(Json(CapabilityResponse {
        action: payload.action,
        decision,
    }))
}

/// Latest session for the caller, minting one if none is current.
/// Only the user named in the path may fetch it.
pub async fn current_session(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(user_id): Path<String>,
) -> Result<Json<IssuedSession>, ApiError> {
    let user_id = UserId::new(user_id);
    if caller != user_id {
        tracing::warn!(caller = %caller, user_id = %user_id, "Session requested for another user");
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "forbidden",
            "sessions can only be fetched by their own user",
        ));
    }

    let session = match state.sessions.current(&user_id).await {
        Some(session) => session,
        None => state.sessions.refresh(&user_id).await?,
    };
    Ok(Json(session))
}

#[derive(Deserialize)]
pub struct ValidateRequest {
    token: String,
}

pub async fn validate_session(
    State(state): State<AppState>,
    Json(payload): Json<ValidateRequest>,
) -> Result<Json<SessionClaims>, ApiError> {
    state
        .sessions
        .validate(&payload.token)
        .map(Json)
        .map_err(|e| {
            tracing::debug!(error = %e, "Session token rejected");
            ApiError::new(StatusCode::UNAUTHORIZED, "invalid_session", e.to_string())
        })
}

#[derive(Serialize)]
pub struct PublicKeyResponse {
    algorithm: &'static str,
    public_key: String,
}

/// Verification key for downstream services checking tokens offline
pub async fn session_public_key(State(state): State<AppState>) -> Json<PublicKeyResponse> {
    Json(PublicKeyResponse {
        algorithm: "ed25519",
        public_key: state.sessions.public_key_b64(),
    })
}
