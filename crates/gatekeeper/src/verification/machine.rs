//! Verification state transitions.
//!
//! ```text
//! Unverified ──org email──▶ OrganizationEmailVerified ──identity──▶ FullyVerified
//!      └──────identity (sub-flag only, unlocks nothing on its own)──────┘
//! ```

use std::sync::Arc;
use thiserror::Error;

use super::store::IdentityStore;
use crate::clock::Clock;
use crate::storage::StoreError;
use trustgate_common::{UserId, VerificationFlags, VerificationStatus};

#[derive(Debug, Error)]
pub enum StateError {
    /// The identity store has no record. Never defaulted to a status.
    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Sole writer of verification flags
pub struct VerificationStateMachine {
    store: Arc<dyn IdentityStore>,
    clock: Arc<dyn Clock>,
}

impl VerificationStateMachine {
    pub fn new(store: Arc<dyn IdentityStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn get_status(&self, user_id: &UserId) -> Result<VerificationStatus, StateError> {
        Ok(self.load(user_id).await?.status())
    }

    /// Record a verified organization email. Idempotent: an already
    /// verified user keeps their stored address and status.
    pub async fn mark_organization_email_verified(
        &self,
        user_id: &UserId,
        address: Option<&str>,
    ) -> Result<VerificationStatus, StateError> {
        self.raise(user_id, "organization_email", |current| {
            (!current.organization_email_verified).then(|| VerificationFlags {
                organization_email_verified: true,
                organization_email: address.map(str::to_string),
                ..Default::default()
            })
        })
        .await
    }

    /// Record approved identity documents. Idempotent.
    pub async fn mark_identity_verified(
        &self,
        user_id: &UserId,
    ) -> Result<VerificationStatus, StateError> {
        self.raise(user_id, "identity", |current| {
            (!current.identity_verified).then(|| VerificationFlags {
                identity_verified: true,
                ..Default::default()
            })
        })
        .await
    }

    /// Record that identity documents await review. Idempotent.
    pub async fn mark_identity_submitted(
        &self,
        user_id: &UserId,
    ) -> Result<VerificationStatus, StateError> {
        self.raise(user_id, "identity_submitted", |current| {
            (!current.identity_submitted && !current.identity_verified).then(|| VerificationFlags {
                identity_submitted: true,
                ..Default::default()
            })
        })
        .await
    }

    async fn load(&self, user_id: &UserId) -> Result<VerificationFlags, StateError> {
        self.store
            .load_verification(user_id)
            .await?
            .ok_or_else(|| StateError::UserNotFound(user_id.clone()))
    }

    /// Apply the change `plan` asks for, if any. `plan` returns `None`
    /// when the flag is already raised.
    async fn raise<F>(
        &self,
        user_id: &UserId,
        transition: &'static str,
        plan: F,
    ) -> Result<VerificationStatus, StateError>
    where
        F: FnOnce(&VerificationFlags) -> Option<VerificationFlags>,
    {
        let current = self.load(user_id).await?;
        let before = current.status();

        let Some(mut change) = plan(&current) else {
            tracing::debug!(user_id = %user_id, transition, "Verification flag already set");
            return Ok(before);
        };
        change.updated_at = self.clock.now();

        let stored = self
            .store
            .save_verification(user_id, &change)
            .await?
            .ok_or_else(|| StateError::UserNotFound(user_id.clone()))?;
        let after = stored.status();

        tracing::info!(
            user_id = %user_id,
            transition,
            from = ?before.current_step(),
            to = ?after.current_step(),
            fully_verified = after.is_fully_verified(),
            "Verification state advanced"
        );

        Ok(after)
    }
}
