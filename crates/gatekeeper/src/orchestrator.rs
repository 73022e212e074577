//! Verification orchestrator.
//!
//! The façade every caller goes through. It composes the OTP manager,
//! the state machine, the capability gate, and session refresh for the
//! three flows (signup, organization email, password reset), and is the
//! only layer that turns component errors into caller-facing outcomes.
//!
//! Per flow instance:
//! ```text
//! AwaitingChallenge ──request──▶ AwaitingCode ──validate──▶ Verified
//!        ▲                          ▲    │
//!        │ terminal                 │    ▼
//!        └──────────── Failed ◀─────┴── mismatch (attempts left)
//! ```

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

use crate::clock::Clock;
use crate::gate;
use crate::otp::{
    ChallengeIssued, OtpChallengeManager, RequestError, ValidationError, domain_of,
    normalize_address,
};
use crate::reset::{ResetAuthorizer, ResetGrant};
use crate::session::SessionSynchronizer;
use crate::storage::StoreError;
use crate::verification::{AccountError, IdentityStore, StateError, VerificationStateMachine};
use trustgate_common::{
    Account, Action, CapabilitySet, OtpPurpose, TrustgateError, UserId, VerificationStatus,
    VerificationStep,
};

/// Where a flow instance stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FlowState {
    AwaitingChallenge,
    AwaitingCode,
    Verified,
    /// `terminal` failures need a new code
    Failed { terminal: bool },
}

impl FlowState {
    /// The state the caller should continue from
    pub fn resume(self) -> FlowState {
        match self {
            Self::Failed { terminal: false } => Self::AwaitingCode,
            Self::Failed { terminal: true } => Self::AwaitingChallenge,
            other => other,
        }
    }
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("{0} is a personal email provider, use your organization address")]
    BlockedDomain(String),

    #[error("an account already exists for this address")]
    AccountExists,

    #[error("verification bypass is disabled in this deployment")]
    BypassDisabled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<AccountError> for FlowError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::AlreadyExists => Self::AccountExists,
            AccountError::Store(e) => Self::Store(e),
        }
    }
}

impl FlowError {
    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Request(RequestError::InvalidAddress(_)) | Self::BlockedDomain(_) => {
                "invalid_address"
            }
            Self::Request(RequestError::CooldownActive { .. }) => "cooldown_active",
            Self::Request(RequestError::DeliveryFailed { .. }) => "delivery_failed",
            Self::Validation(ValidationError::NotFound) => "not_found",
            Self::Validation(ValidationError::Expired) => "expired",
            Self::Validation(ValidationError::Mismatch { .. }) => "mismatch",
            Self::Validation(ValidationError::TooManyAttempts) => "too_many_attempts",
            Self::State(StateError::UserNotFound(_)) => "user_not_found",
            Self::AccountExists => "account_exists",
            Self::BypassDisabled => "forbidden",
            Self::Request(RequestError::Store(_))
            | Self::Validation(ValidationError::Store(_))
            | Self::State(StateError::Store(_))
            | Self::Store(_) => "unavailable",
        }
    }

    /// Message safe to show the end user
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(ValidationError::NotFound) => {
                "No active code for this address. Please request a new code.".to_string()
            }
            Self::Validation(ValidationError::Expired) => {
                "This code has expired. Please request a new code.".to_string()
            }
            Self::Validation(ValidationError::TooManyAttempts) => {
                "Too many incorrect attempts. Please request a new code.".to_string()
            }
            Self::Validation(ValidationError::Mismatch {
                attempts_remaining: 0,
            }) => "Incorrect code. Please request a new code.".to_string(),
            Self::Request(RequestError::DeliveryFailed { terminal: true, .. }) => {
                "We could not deliver a code to this address.".to_string()
            }
            Self::Request(RequestError::DeliveryFailed { terminal: false, .. }) => {
                "We could not send your code right now. Please try again shortly.".to_string()
            }
            Self::Request(RequestError::Store(_))
            | Self::Validation(ValidationError::Store(_))
            | Self::State(StateError::Store(_))
            | Self::Store(_) => "Service temporarily unavailable.".to_string(),
            other => other.to_string(),
        }
    }

    /// Flow state implied by this error, for flow-stage errors
    pub fn flow_state(&self) -> Option<FlowState> {
        match self {
            Self::Request(RequestError::CooldownActive { .. })
            | Self::Request(RequestError::DeliveryFailed {
                terminal: false, ..
            }) => Some(FlowState::AwaitingCode),
            Self::Request(RequestError::InvalidAddress(_))
            | Self::Request(RequestError::DeliveryFailed { terminal: true, .. })
            | Self::BlockedDomain(_) => Some(FlowState::AwaitingChallenge),
            Self::Validation(ValidationError::Store(_)) => None,
            Self::Validation(err) => Some(FlowState::Failed {
                terminal: err.requires_new_code(),
            }),
            _ => None,
        }
    }

    /// Seconds until a new code can be requested
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Request(RequestError::CooldownActive { retry_after_secs }) => {
                Some(*retry_after_secs)
            }
            _ => None,
        }
    }

    pub fn attempts_remaining(&self) -> Option<u32> {
        match self {
            Self::Validation(ValidationError::Mismatch { attempts_remaining }) => {
                Some(*attempts_remaining)
            }
            _ => None,
        }
    }
}

impl From<&FlowError> for TrustgateError {
    fn from(err: &FlowError) -> Self {
        let message = err.user_message();
        match err {
            FlowError::Request(RequestError::InvalidAddress(_)) | FlowError::BlockedDomain(_) => {
                TrustgateError::InvalidInput(message)
            }
            FlowError::Request(RequestError::CooldownActive { retry_after_secs }) => {
                TrustgateError::CooldownActive(*retry_after_secs)
            }
            FlowError::Request(RequestError::DeliveryFailed { .. }) => {
                TrustgateError::Delivery(message)
            }
            FlowError::Validation(ValidationError::Mismatch { .. }) => {
                TrustgateError::Verification(message)
            }
            FlowError::Validation(ValidationError::Store(_))
            | FlowError::Request(RequestError::Store(_))
            | FlowError::State(StateError::Store(_))
            | FlowError::Store(_) => TrustgateError::Storage(message),
            FlowError::Validation(_) => TrustgateError::ChallengeGone(message),
            FlowError::State(StateError::UserNotFound(_)) => TrustgateError::NotFound(message),
            FlowError::AccountExists => TrustgateError::Conflict(message),
            FlowError::BypassDisabled => TrustgateError::Forbidden(message),
        }
    }
}

/// Status plus the capabilities it grants, recomputed on every read
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationView {
    pub user_id: UserId,
    #[serde(flatten)]
    pub status: VerificationStatus,
    pub capabilities: CapabilitySet,
}

impl VerificationView {
    fn new(user_id: UserId, status: VerificationStatus) -> Self {
        let capabilities = gate::derive(&status);
        Self {
            user_id,
            status,
            capabilities,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignupCompleted {
    pub account: Account,
    #[serde(flatten)]
    pub verification: VerificationView,
}

/// Answer to a capability check. Being blocked is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapabilityDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_step: Option<VerificationStep>,
}

/// What a caller may know about an outstanding challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChallengeState {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts_remaining: Option<u32>,
    pub resend_after_secs: u64,
}

/// Deployment policy applied by the orchestrator
#[derive(Debug, Clone, Default)]
pub struct FlowPolicy {
    /// Domains refused by the organization-email flow
    pub blocked_domains: HashSet<String>,
    /// Allow marking users fully verified without any flow
    pub verification_bypass: bool,
}

pub struct VerificationOrchestrator {
    otp: Arc<OtpChallengeManager>,
    machine: Arc<VerificationStateMachine>,
    identity: Arc<dyn IdentityStore>,
    sessions: Arc<SessionSynchronizer>,
    resets: Arc<dyn ResetAuthorizer>,
    clock: Arc<dyn Clock>,
    policy: FlowPolicy,
}

impl VerificationOrchestrator {
    pub fn new(
        otp: Arc<OtpChallengeManager>,
        machine: Arc<VerificationStateMachine>,
        identity: Arc<dyn IdentityStore>,
        sessions: Arc<SessionSynchronizer>,
        resets: Arc<dyn ResetAuthorizer>,
        clock: Arc<dyn Clock>,
        policy: FlowPolicy,
    ) -> Self {
        Self {
            otp,
            machine,
            identity,
            sessions,
            resets,
            clock,
            policy,
        }
    }

    // === Signup ===

    pub async fn request_signup(
        &self,
        email: &str,
        display_name: Option<&str>,
    ) -> Result<ChallengeIssued, FlowError> {
        Ok(self
            .otp
            .request_challenge(OtpPurpose::Signup, email, display_name)
            .await?)
    }

    /// Verify the signup code and create the account, unverified
    pub async fn complete_signup(
        &self,
        email: &str,
        code: &str,
    ) -> Result<SignupCompleted, FlowError> {
        let address = normalize_address(email).map_err(RequestError::from)?;

        let challenge = self.otp.lookup(OtpPurpose::Signup, &address).await?;
        self.otp
            .validate_challenge(OtpPurpose::Signup, &address, code)
            .await?;

        let display_name = challenge.and_then(|c| c.display_name);
        let account = self
            .identity
            .create_account(&address, display_name.as_deref(), self.clock.now())
            .await?;

        tracing::info!(user_id = %account.user_id, "Account created");

        let status = self.machine.get_status(&account.user_id).await?;
        Ok(SignupCompleted {
            verification: VerificationView::new(account.user_id.clone(), status),
            account,
        })
    }

    // === Organization email ===

    pub async fn request_organization_email(
        &self,
        user_id: &UserId,
        email: &str,
        display_name: Option<&str>,
    ) -> Result<ChallengeIssued, FlowError> {
        self.machine.get_status(user_id).await?;
        let address = self.organization_address(email)?;

        Ok(self
            .otp
            .request_challenge(OtpPurpose::OrganizationEmail, &address, display_name)
            .await?)
    }

    /// Verify the organization code, advance the user's state, and refresh
    /// their session in the background
    pub async fn complete_organization_email(
        &self,
        user_id: &UserId,
        email: &str,
        code: &str,
    ) -> Result<VerificationView, FlowError> {
        // Fail before consuming the code if the user is unknown
        self.machine.get_status(user_id).await?;
        let address = self.organization_address(email)?;

        self.otp
            .validate_challenge(OtpPurpose::OrganizationEmail, &address, code)
            .await?;

        let status = self
            .machine
            .mark_organization_email_verified(user_id, Some(&address))
            .await?;
        self.sessions.spawn(user_id.clone());

        Ok(VerificationView::new(user_id.clone(), status))
    }

    fn organization_address(&self, email: &str) -> Result<String, FlowError> {
        let address = normalize_address(email).map_err(RequestError::from)?;
        let blocked = domain_of(&address)
            .filter(|domain| self.policy.blocked_domains.contains(*domain))
            .map(str::to_string);

        if let Some(domain) = blocked {
            tracing::debug!(domain = %domain, "Personal domain refused for organization flow");
            return Err(FlowError::BlockedDomain(domain));
        }
        Ok(address)
    }

    // === Password reset ===

    /// Send a reset code. Unknown addresses get the same answer, cooldown
    /// included, without any code being sent.
    pub async fn request_password_reset(&self, email: &str) -> Result<ChallengeIssued, FlowError> {
        let address = normalize_address(email).map_err(RequestError::from)?;

        let Some(account) = self.identity.find_by_email(&address).await? else {
            tracing::debug!("Password reset requested for unknown address");
            return Ok(self
                .otp
                .hold_challenge(OtpPurpose::PasswordReset, &address)
                .await?);
        };

        Ok(self
            .otp
            .request_challenge(
                OtpPurpose::PasswordReset,
                &address,
                account.display_name.as_deref(),
            )
            .await?)
    }

    /// Exchange a verified reset code for a single-use reset grant
    pub async fn complete_password_reset(
        &self,
        email: &str,
        code: &str,
    ) -> Result<ResetGrant, FlowError> {
        let address = normalize_address(email).map_err(RequestError::from)?;

        self.otp
            .validate_challenge(OtpPurpose::PasswordReset, &address, code)
            .await?;

        let account = self
            .identity
            .find_by_email(&address)
            .await?
            .ok_or(FlowError::Validation(ValidationError::NotFound))?;

        let grant = self.resets.authorize(&account, self.clock.now()).await?;
        tracing::info!(user_id = %account.user_id, expires_at = grant.expires_at, "Password reset authorized");

        Ok(grant)
    }

    /// Consume a reset grant on behalf of the password service
    pub async fn redeem_reset_grant(&self, token: &str) -> Result<Option<ResetGrant>, FlowError> {
        Ok(self.resets.redeem(token, self.clock.now()).await?)
    }

    // === Status & capabilities ===

    pub async fn status(&self, user_id: &UserId) -> Result<VerificationView, FlowError> {
        let status = self.machine.get_status(user_id).await?;
        Ok(VerificationView::new(user_id.clone(), status))
    }

    pub async fn check_capability(
        &self,
        user_id: &UserId,
        action: Action,
    ) -> Result<CapabilityDecision, FlowError> {
        let status = self.machine.get_status(user_id).await?;

        Ok(match gate::check_capability(&status, action) {
            Ok(()) => CapabilityDecision {
                allowed: true,
                required_step: None,
            },
            Err(blocked) => {
                tracing::debug!(user_id = %user_id, ?action, required_step = ?blocked.required_step, "Action blocked");
                CapabilityDecision {
                    allowed: false,
                    required_step: Some(blocked.required_step),
                }
            }
        })
    }

    pub async fn challenge_state(
        &self,
        purpose: OtpPurpose,
        address: &str,
    ) -> Result<ChallengeState, FlowError> {
        let now = self.clock.now();
        let challenge = self
            .otp
            .lookup(purpose, address)
            .await?
            .filter(|c| c.is_live(now));
        let resend_after_secs = self.otp.cooldown_remaining(purpose, address).await?;

        Ok(ChallengeState {
            active: challenge.is_some(),
            expires_in_secs: challenge.as_ref().map(|c| (c.expires_at - now).max(0) as u64),
            attempts_remaining: challenge.as_ref().map(|c| c.attempts_remaining),
            resend_after_secs,
        })
    }

    // === Identity review ===

    pub async fn mark_identity_submitted(
        &self,
        user_id: &UserId,
    ) -> Result<VerificationView, FlowError> {
        let status = self.machine.mark_identity_submitted(user_id).await?;
        Ok(VerificationView::new(user_id.clone(), status))
    }

    pub async fn mark_identity_verified(
        &self,
        user_id: &UserId,
    ) -> Result<VerificationView, FlowError> {
        let status = self.machine.mark_identity_verified(user_id).await?;
        self.sessions.spawn(user_id.clone());
        Ok(VerificationView::new(user_id.clone(), status))
    }

    /// Mark a user fully verified without running any flow. Refused unless
    /// the deployment enabled the bypass.
    pub async fn complete_verification_for_testing(
        &self,
        user_id: &UserId,
    ) -> Result<VerificationView, FlowError> {
        if !self.policy.verification_bypass {
            tracing::warn!(user_id = %user_id, "Verification bypass attempted while disabled");
            return Err(FlowError::BypassDisabled);
        }

        tracing::warn!(user_id = %user_id, "⚠️ Completing verification through development bypass");
        self.machine
            .mark_organization_email_verified(user_id, None)
            .await?;
        let status = self.machine.mark_identity_verified(user_id).await?;
        self.sessions.spawn(user_id.clone());

        Ok(VerificationView::new(user_id.clone(), status))
    }

    /// Both backing stores reachable
    pub async fn ready(&self) -> Result<(), StoreError> {
        self.otp.ping().await?;
        self.identity.ping().await
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::time::Duration;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_signup_creates_unverified_account() {
        let fx = fixture(default_policy());
        assert_ok!(fx.orchestrator.request_signup("New@Org.com", Some("Ada")).await);

        let done = assert_ok!(fx.orchestrator.complete_signup("new@org.com", CODE).await);
        assert_eq!(done.account.email, "new@org.com");
        assert_eq!(done.account.display_name.as_deref(), Some("Ada"));
        assert!(!done.verification.status.is_organization_email_verified());
        assert_eq!(done.verification.capabilities, CapabilitySet::default());
    }

    #[tokio::test]
    async fn test_duplicate_signup() {
        let fx = fixture(default_policy());
        signed_up(&fx, "dup@org.com").await;

        fx.clock.advance(60);
        assert_ok!(fx.orchestrator.request_signup("dup@org.com", None).await);
        let err = fx.orchestrator.complete_signup("dup@org.com", CODE).await.unwrap_err();
        assert!(matches!(err, FlowError::AccountExists));
    }

    #[tokio::test]
    async fn test_organization_email_end_to_end() {
        let fx = fixture(default_policy());
        let user = signed_up(&fx, "someone@home.net").await;

        assert_ok!(fx.orchestrator.request_organization_email(&user, "user@org.com", None).await);
        assert_eq!(fx.notifier.last_code().as_deref(), Some(CODE));

        let view = assert_ok!(
            fx.orchestrator
                .complete_organization_email(&user, "user@org.com", CODE)
                .await
        );
        assert!(view.status.is_organization_email_verified());

        let view = assert_ok!(fx.orchestrator.status(&user).await);
        assert!(view.status.is_organization_email_verified());
        assert!(view.capabilities.can_buy);
        assert!(!view.capabilities.can_sell);

        // Session refresh runs in the background
        tokio::time::sleep(Duration::from_millis(50)).await;
        let session = fx.issuer.current(&user).await.expect("session refreshed");
        assert!(session.capabilities.can_buy);
    }

    #[tokio::test]
    async fn test_organization_flow_rejects_personal_domain() {
        let fx = fixture(default_policy());
        let user = signed_up(&fx, "someone@home.net").await;

        let err = fx
            .orchestrator
            .request_organization_email(&user, "me@Gmail.com", None)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::BlockedDomain(_)));
        assert_eq!(err.code(), "invalid_address");
    }

    #[tokio::test]
    async fn test_organization_flow_unknown_user() {
        let fx = fixture(default_policy());
        let err = fx
            .orchestrator
            .request_organization_email(&UserId::from("usr_ghost"), "user@org.com", None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "user_not_found");
        assert_eq!(fx.notifier.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_flow_states() {
        let fx = fixture(default_policy());
        let user = signed_up(&fx, "someone@home.net").await;
        assert_ok!(fx.orchestrator.request_organization_email(&user, "user@org.com", None).await);

        let err = fx
            .orchestrator
            .complete_organization_email(&user, "user@org.com", "000000")
            .await
            .unwrap_err();
        let state = err.flow_state().unwrap();
        assert_eq!(state, FlowState::Failed { terminal: false });
        assert_eq!(state.resume(), FlowState::AwaitingCode);
        assert_eq!(err.attempts_remaining(), Some(4));

        fx.clock.advance(601);
        let err = fx
            .orchestrator
            .complete_organization_email(&user, "user@org.com", CODE)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "expired");
        assert_eq!(err.flow_state().unwrap().resume(), FlowState::AwaitingChallenge);
    }

    #[tokio::test]
    async fn test_cooldown_surfaces_retry_after() {
        let fx = fixture(default_policy());
        assert_ok!(fx.orchestrator.request_signup("a@org.com", None).await);

        fx.clock.advance(15);
        let err = fx.orchestrator.request_signup("a@org.com", None).await.unwrap_err();
        assert_eq!(err.retry_after_secs(), Some(45));
        assert_eq!(TrustgateError::from(&err).status_code(), 429);
        assert_eq!(err.flow_state(), Some(FlowState::AwaitingCode));
    }

    #[tokio::test]
    async fn test_password_reset_flow() {
        let fx = fixture(default_policy());
        let user = signed_up(&fx, "user@org.com").await;

        assert_ok!(fx.orchestrator.request_password_reset("user@org.com").await);
        let grant = assert_ok!(fx.orchestrator.complete_password_reset("user@org.com", CODE).await);
        assert_eq!(grant.user_id, user);

        let redeemed = assert_ok!(fx.orchestrator.redeem_reset_grant(&grant.token).await);
        assert_eq!(redeemed, Some(grant.clone()));
        assert_eq!(assert_ok!(fx.orchestrator.redeem_reset_grant(&grant.token).await), None);
    }

    #[tokio::test]
    async fn test_password_reset_unknown_address_sends_nothing() {
        let fx = fixture(default_policy());
        let sent_before = fx.notifier.sent_count();

        assert_ok!(fx.orchestrator.request_password_reset("ghost@org.com").await);
        assert_eq!(fx.notifier.sent_count(), sent_before);

        let err = fx
            .orchestrator
            .complete_password_reset("ghost@org.com", CODE)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "mismatch");
    }

    #[tokio::test]
    async fn test_password_reset_answers_alike_for_unknown_address() {
        let fx = fixture(default_policy());
        signed_up(&fx, "known@org.com").await;

        for email in ["known@org.com", "ghost@org.com"] {
            let first = assert_ok!(fx.orchestrator.request_password_reset(email).await);
            assert_eq!(first.expires_in_secs, 600);
            assert_eq!(first.resend_after_secs, 60);
        }

        fx.clock.advance(5);
        for email in ["known@org.com", "ghost@org.com"] {
            let err = fx.orchestrator.request_password_reset(email).await.unwrap_err();
            assert_eq!(err.code(), "cooldown_active", "{email}");
            assert_eq!(err.retry_after_secs(), Some(55), "{email}");
        }

        let known = fx.orchestrator.complete_password_reset("known@org.com", "000000").await.unwrap_err();
        let ghost = fx.orchestrator.complete_password_reset("ghost@org.com", "000000").await.unwrap_err();
        assert_eq!(known.code(), ghost.code());
        assert_eq!(known.attempts_remaining(), ghost.attempts_remaining());
    }

    #[tokio::test]
    async fn test_capability_checks() {
        let fx = fixture(default_policy());
        let user = signed_up(&fx, "someone@home.net").await;

        let buy = assert_ok!(fx.orchestrator.check_capability(&user, Action::Buy).await);
        assert_eq!(buy.required_step, Some(VerificationStep::Organization));

        fx.orchestrator.request_organization_email(&user, "user@org.com", None).await.unwrap();
        fx.orchestrator
            .complete_organization_email(&user, "user@org.com", CODE)
            .await
            .unwrap();

        let buy = assert_ok!(fx.orchestrator.check_capability(&user, Action::Buy).await);
        assert!(buy.allowed);
        let sell = assert_ok!(fx.orchestrator.check_capability(&user, Action::Sell).await);
        assert_eq!(sell.required_step, Some(VerificationStep::Identity));

        fx.orchestrator.mark_identity_verified(&user).await.unwrap();
        let sell = assert_ok!(fx.orchestrator.check_capability(&user, Action::Sell).await);
        assert!(sell.allowed);
    }

    #[tokio::test]
    async fn test_bypass_disabled_by_default() {
        let fx = fixture(default_policy());
        let user = signed_up(&fx, "someone@home.net").await;

        let err = fx
            .orchestrator
            .complete_verification_for_testing(&user)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::BypassDisabled));
        assert!(!fx.orchestrator.status(&user).await.unwrap().status.is_organization_email_verified());
    }

    #[tokio::test]
    async fn test_bypass_when_enabled() {
        let fx = fixture(FlowPolicy {
            verification_bypass: true,
            ..default_policy()
        });
        let user = signed_up(&fx, "someone@home.net").await;

        let view = assert_ok!(fx.orchestrator.complete_verification_for_testing(&user).await);
        assert!(view.status.is_fully_verified());
        assert!(view.capabilities.can_sell);
    }

    #[tokio::test]
    async fn test_challenge_state() {
        let fx = fixture(default_policy());
        assert_ok!(fx.orchestrator.request_signup("a@org.com", None).await);
        fx.clock.advance(10);

        let state = assert_ok!(fx.orchestrator.challenge_state(OtpPurpose::Signup, "a@org.com").await);
        assert!(state.active);
        assert_eq!(state.expires_in_secs, Some(590));
        assert_eq!(state.attempts_remaining, Some(5));
        assert_eq!(state.resend_after_secs, 50);

        let none = assert_ok!(fx.orchestrator.challenge_state(OtpPurpose::PasswordReset, "a@org.com").await);
        assert!(!none.active);
        assert_eq!(none.resend_after_secs, 0);
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (FlowError::Validation(ValidationError::Mismatch { attempts_remaining: 2 }), 401),
            (FlowError::Validation(ValidationError::Expired), 410),
            (FlowError::Validation(ValidationError::TooManyAttempts), 410),
            (FlowError::State(StateError::UserNotFound(UserId::from("u"))), 404),
            (FlowError::AccountExists, 409),
            (FlowError::BypassDisabled, 403),
            (FlowError::Store(StoreError::Backend("down".into())), 503),
        ];
        for (err, status) in cases {
            assert_eq!(TrustgateError::from(&err).status_code(), status, "{err:?}");
        }
    }
}
