//! Common error types for Trustgate components.

use thiserror::Error;

/// Common errors across Trustgate components
#[derive(Debug, Error)]
pub enum TrustgateError {
    /// Backing store connection/operation error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Notification channel failure
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// Caller must wait before requesting another code
    #[error("Cooldown active: retry after {0}s")]
    CooldownActive(u64),

    /// Submitted code did not verify
    #[error("Verification failed: {0}")]
    Verification(String),

    /// Challenge no longer usable, a new code is required
    #[error("Challenge gone: {0}")]
    ChallengeGone(String),

    /// Referenced record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Record already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Operation not permitted in this deployment
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Invalid input/request
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl TrustgateError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Storage(_) => 503,
            Self::Delivery(_) => 502,
            Self::CooldownActive(_) => 429,
            Self::Verification(_) => 401,
            Self::ChallengeGone(_) => 410,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Forbidden(_) => 403,
            Self::InvalidInput(_) => 400,
        }
    }

    /// Returns true if this error should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::Delivery(_) | Self::CooldownActive(_)
        )
    }
}
