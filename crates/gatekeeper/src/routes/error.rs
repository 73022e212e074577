//! Error responses and request extractors shared by the handlers.

use axum::{
    Json,
    extract::FromRequestParts,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER, request::Parts},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::orchestrator::{FlowError, FlowState};
use crate::session::SessionError;
use trustgate_common::constants::headers;
use trustgate_common::{TrustgateError, UserId};

/// JSON error body: `{ "error": <code>, "message": <text>, ...detail }`
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attempts_remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flow: Option<FlowState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next: Option<FlowState>,
    /// Same request may succeed later
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    retryable: bool,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, error: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error,
                message: message.into(),
                retry_after_seconds: None,
                attempts_remaining: None,
                flow: None,
                next: None,
                retryable: false,
            },
        }
    }
}

fn status_of(err: &TrustgateError) -> StatusCode {
    StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

impl From<FlowError> for ApiError {
    fn from(err: FlowError) -> Self {
        let common = TrustgateError::from(&err);
        let status = status_of(&common);
        if status.is_server_error() {
            tracing::warn!(error = %err, code = err.code(), "Request failed");
        } else {
            tracing::debug!(error = %err, code = err.code(), "Request rejected");
        }

        let flow = err.flow_state();
        let mut api = Self::new(status, err.code(), err.user_message());
        api.body.retry_after_seconds = err.retry_after_secs();
        api.body.attempts_remaining = err.attempts_remaining();
        api.body.flow = flow;
        api.body.next = flow.map(FlowState::resume);
        api.body.retryable = common.is_retryable();
        api
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::UnknownUser(user_id) => Self::new(
                StatusCode::NOT_FOUND,
                "user_not_found",
                format!("user {} not found", user_id),
            ),
            SessionError::Store(e) => {
                tracing::warn!(error = %e, "Session store failure");
                let err = TrustgateError::from(e);
                let mut api =
                    Self::new(status_of(&err), "unavailable", "Service temporarily unavailable.");
                api.body.retryable = err.is_retryable();
                api
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let retry_after = self.body.retry_after_seconds;
        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Authenticated caller, taken from the `X-User-Id` header set by the
/// upstream auth proxy
#[derive(Debug, Clone)]
pub struct CallerId(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for CallerId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(headers::X_USER_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| CallerId(UserId::from(v)))
            .ok_or_else(|| {
                ApiError::new(
                    StatusCode::UNAUTHORIZED,
                    "unauthenticated",
                    format!("missing {} header", headers::X_USER_ID),
                )
            })
    }
}
