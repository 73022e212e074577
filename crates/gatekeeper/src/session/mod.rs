//! Session issuing and post-verification refresh.
//!
//! Sessions embed capability claims, so a verification transition leaves
//! previously issued tokens stale until they are refreshed.

mod sync;
mod token;

pub use sync::SessionSynchronizer;
pub use token::{IssuedSession, SessionClaims, SessionTokenConfig, SessionTokenService, TokenSessionIssuer};

use async_trait::async_trait;
use thiserror::Error;

use crate::storage::StoreError;
use trustgate_common::UserId;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("user {0} not found")]
    UnknownUser(UserId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Produces fresh sessions for a user
#[async_trait]
pub trait SessionIssuer: Send + Sync {
    /// Re-issue the user's session so it reflects their current state
    async fn refresh(&self, user_id: &UserId) -> Result<IssuedSession, SessionError>;
}
