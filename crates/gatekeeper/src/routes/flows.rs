//! Signup, organization-email, and password-reset endpoints.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};

use super::error::{ApiError, CallerId};
use crate::orchestrator::{ChallengeState, FlowState, SignupCompleted, VerificationView};
use crate::otp::ChallengeIssued;
use crate::reset::ResetGrant;
use crate::state::AppState;
use trustgate_common::OtpPurpose;

#[derive(Deserialize)]
pub struct ChallengeRequest {
    email: String,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    email: String,
    code: String,
}

#[derive(Deserialize)]
pub struct ChallengeQuery {
    email: String,
}

#[derive(Serialize)]
pub struct ChallengeResponse {
    ok: bool,
    expires_in_secs: u64,
    resend_after_secs: u64,
    flow: FlowState,
}

impl From<ChallengeIssued> for ChallengeResponse {
    fn from(issued: ChallengeIssued) -> Self {
        Self {
            ok: true,
            expires_in_secs: issued.expires_in_secs,
            resend_after_secs: issued.resend_after_secs,
            flow: FlowState::AwaitingCode,
        }
    }
}

/// Successful verification, tagged with the final flow state
#[derive(Serialize)]
pub struct Verified<T> {
    flow: FlowState,
    #[serde(flatten)]
    body: T,
}

impl<T> Verified<T> {
    fn new(body: T) -> Json<Self> {
        Json(Self {
            flow: FlowState::Verified,
            body,
        })
    }
}

// === Signup ===

pub async fn signup_challenge(
    State(state): State<AppState>,
    Json(payload): Json<ChallengeRequest>,
) -> Result<Json<ChallengeResponse>, ApiError> {
    let issued = state
        .orchestrator
        .request_signup(&payload.email, payload.display_name.as_deref())
        .await?;
    Ok(Json(issued.into()))
}

pub async fn signup_verify(
    State(state): State<AppState>,
    Json(payload): Json<VerifyRequest>,
) -> Result<Json<Verified<SignupCompleted>>, ApiError> {
    let completed = state
        .orchestrator
        .complete_signup(&payload.email, &payload.code)
        .await?;
    Ok(Verified::new(completed))
}

pub async fn signup_status(
    State(state): State<AppState>,
    Query(query): Query<ChallengeQuery>,
) -> Result<Json<ChallengeState>, ApiError> {
    challenge_state(&state, OtpPurpose::Signup, &query.email).await
}

// === Organization email ===

pub async fn organization_challenge(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Json(payload): Json<ChallengeRequest>,
) -> Result<Json<ChallengeResponse>, ApiError> {
    let issued = state
        .orchestrator
        .request_organization_email(&user_id, &payload.email, payload.display_name.as_deref())
        .await?;
    Ok(Json(issued.into()))
}

pub async fn organization_verify(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Json(payload): Json<VerifyRequest>,
) -> Result<Json<Verified<VerificationView>>, ApiError> {
    let view = state
        .orchestrator
        .complete_organization_email(&user_id, &payload.email, &payload.code)
        .await?;
    Ok(Verified::new(view))
}

pub async fn organization_status(
    State(state): State<AppState>,
    Query(query): Query<ChallengeQuery>,
) -> Result<Json<ChallengeState>, ApiError> {
    challenge_state(&state, OtpPurpose::OrganizationEmail, &query.email).await
}

// === Password reset ===

#[derive(Deserialize)]
pub struct ResetRequest {
    email: String,
}

pub async fn reset_challenge(
    State(state): State<AppState>,
    Json(payload): Json<ResetRequest>,
) -> Result<Json<ChallengeResponse>, ApiError> {
    let issued = state
        .orchestrator
        .request_password_reset(&payload.email)
        .await?;
    Ok(Json(issued.into()))
}

pub async fn reset_verify(
    State(state): State<AppState>,
    Json(payload): Json<VerifyRequest>,
) -> Result<Json<Verified<ResetGrant>>, ApiError> {
    let grant = state
        .orchestrator
        .complete_password_reset(&payload.email, &payload.code)
        .await?;
    Ok(Verified::new(grant))
}

async fn challenge_state(
    state: &AppState,
    purpose: OtpPurpose,
    email: &str,
) -> Result<Json<ChallengeState>, ApiError> {
    Ok(Json(
        state.orchestrator.challenge_state(purpose, email).await?,
    ))
}
