//! Core types shared across Trustgate components.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Opaque user identifier issued at signup
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// What an OTP challenge proves control of an address for.
///
/// Each purpose is an independent namespace: a signup code can never
/// satisfy an organization-email or password-reset challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    Signup,
    OrganizationEmail,
    PasswordReset,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signup => "signup",
            Self::OrganizationEmail => "organization_email",
            Self::PasswordReset => "password_reset",
        }
    }
}

impl fmt::Display for OtpPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The next verification flow a user has to go through
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStep {
    /// Organization email still unverified
    Organization,
    /// Organization email done, identity documents outstanding
    Identity,
    /// Both requirements met
    Complete,
    /// No step information (never produced by derivation)
    #[default]
    None,
}

/// UI hints describing what the user still has to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingAction {
    VerifyEmail,
    UploadDocuments,
    AdminReview,
}

/// Persisted verification flags for one user.
///
/// Flags only ever go from `false` to `true`; [`VerificationFlags::merge`]
/// is the only way two records are combined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationFlags {
    /// Organization email passed OTP verification
    pub organization_email_verified: bool,

    /// Identity documents approved
    pub identity_verified: bool,

    /// Identity documents uploaded and awaiting review
    #[serde(default)]
    pub identity_submitted: bool,

    /// The organization address that was verified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_email: Option<String>,

    /// Last change (Unix epoch seconds)
    #[serde(default)]
    pub updated_at: i64,
}

impl VerificationFlags {
    /// Combine two records, keeping every flag raised in either
    pub fn merge(&mut self, other: &VerificationFlags) {
        self.organization_email_verified |= other.organization_email_verified;
        self.identity_verified |= other.identity_verified;
        self.identity_submitted |= other.identity_submitted;
        if other.organization_email.is_some() {
            self.organization_email = other.organization_email.clone();
        }
        self.updated_at = self.updated_at.max(other.updated_at);
    }

    /// Derive the status view of these flags
    pub fn status(&self) -> VerificationStatus {
        VerificationStatus::from_flags(
            self.organization_email_verified,
            self.identity_verified,
            self.identity_submitted,
        )
    }
}

/// Verification state attached 1:1 to a user.
///
/// Only constructible from the underlying flags, so `is_fully_verified`
/// and `current_step` can never disagree with them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationStatus {
    is_identity_verified: bool,
    is_organization_email_verified: bool,
    is_fully_verified: bool,
    current_step: VerificationStep,
    pending_actions: BTreeSet<PendingAction>,
}

impl VerificationStatus {
    /// Build the status from the two verification flags and the
    /// document-submission hint.
    pub fn from_flags(
        organization_email_verified: bool,
        identity_verified: bool,
        identity_submitted: bool,
    ) -> Self {
        let is_fully_verified = organization_email_verified && identity_verified;

        let current_step = if is_fully_verified {
            VerificationStep::Complete
        } else if !organization_email_verified {
            VerificationStep::Organization
        } else {
            VerificationStep::Identity
        };

        let mut pending_actions = BTreeSet::new();
        if !organization_email_verified {
            pending_actions.insert(PendingAction::VerifyEmail);
        }
        if !identity_verified {
            if identity_submitted {
                pending_actions.insert(PendingAction::AdminReview);
            } else {
                pending_actions.insert(PendingAction::UploadDocuments);
            }
        }

        Self {
            is_identity_verified: identity_verified,
            is_organization_email_verified: organization_email_verified,
            is_fully_verified,
            current_step,
            pending_actions,
        }
    }

    /// Status of a user with no verification at all
    pub fn unverified() -> Self {
        Self::from_flags(false, false, false)
    }

    pub fn is_identity_verified(&self) -> bool {
        self.is_identity_verified
    }

    pub fn is_organization_email_verified(&self) -> bool {
        self.is_organization_email_verified
    }

    pub fn is_fully_verified(&self) -> bool {
        self.is_fully_verified
    }

    pub fn current_step(&self) -> VerificationStep {
        self.current_step
    }

    pub fn pending_actions(&self) -> &BTreeSet<PendingAction> {
        &self.pending_actions
    }
}

/// A protected marketplace action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
    Contact,
}

impl Action {
    pub const ALL: [Action; 3] = [Self::Buy, Self::Sell, Self::Contact];
}

/// Permissions derived from a [`VerificationStatus`]. Never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub can_buy: bool,
    pub can_sell: bool,
    pub can_contact: bool,
}

impl CapabilitySet {
    pub fn allows(&self, action: Action) -> bool {
        match action {
            Action::Buy => self.can_buy,
            Action::Sell => self.can_sell,
            Action::Contact => self.can_contact,
        }
    }
}

/// A registered account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: UserId,

    /// Signup address (normalized)
    pub email: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Creation timestamp (Unix epoch seconds)
    pub created_at: i64,
}
