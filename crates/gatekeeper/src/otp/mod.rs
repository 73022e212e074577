//! One-time-passcode challenges.
//!
//! A challenge is keyed by `(purpose, address)`. At most one live
//! challenge exists per key: issuing a new one supersedes the old, a
//! successful validation consumes it, and expiry or an exhausted attempt
//! budget retires it.

mod address;
mod code;
mod manager;
mod redis_store;
mod store;

pub use address::{AddressError, domain_of, normalize_address};
pub use code::{CodeGenerator, OtpCode, RandomCodeGenerator, SealedCode};
pub use manager::{
    ChallengeIssued, OtpChallengeManager, OtpSettings, RequestError, ValidationError,
    sweep_worker,
};
#[cfg(test)]
pub use manager::testing::FixedCodeGenerator;
pub use redis_store::RedisChallengeStore;
pub use store::{ChallengeStore, IssueOutcome, MemoryChallengeStore};

use serde::{Deserialize, Serialize};
use std::fmt;
use trustgate_common::OtpPurpose;
use trustgate_common::constants::redis_keys;

/// Identity of a challenge slot
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChallengeKey {
    pub purpose: OtpPurpose,
    /// Normalized subject address
    pub address: String,
}

impl ChallengeKey {
    pub fn new(purpose: OtpPurpose, address: impl Into<String>) -> Self {
        Self {
            purpose,
            address: address.into(),
        }
    }

    /// Redis key: otp:{purpose}:{address}
    pub fn redis_key(&self) -> String {
        format!("{}{}:{}", redis_keys::OTP_PREFIX, self.purpose, self.address)
    }
}

impl fmt::Display for ChallengeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.purpose, self.address)
    }
}

/// Stored challenge record. The code itself is only kept sealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpChallenge {
    pub purpose: OtpPurpose,

    /// Normalized email address the code was sent to
    pub subject_address: String,

    pub code_hash: SealedCode,

    /// Creation timestamp (Unix epoch seconds)
    pub issued_at: i64,

    /// `issued_at + ttl`
    pub expires_at: i64,

    /// Failed validations left before the challenge is retired
    pub attempts_remaining: u32,

    /// Last issuance for this key, drives the resend cooldown
    pub last_issued_at: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// The notifier failed transiently, so a resend is not held back
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub undelivered: bool,
}

impl OtpChallenge {
    pub fn key(&self) -> ChallengeKey {
        ChallengeKey::new(self.purpose, self.subject_address.clone())
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts_remaining == 0
    }

    /// Still usable for validation and still counts towards the cooldown
    pub fn is_live(&self, now: i64) -> bool {
        !self.is_expired(now) && !self.is_exhausted()
    }

    /// Seconds until another code may be issued for this key, if any
    pub fn cooldown_remaining(&self, now: i64, cooldown_secs: u64) -> Option<u64> {
        if !self.is_live(now) || self.undelivered {
            return None;
        }
        let elapsed = now - self.last_issued_at;
        let cooldown = cooldown_secs as i64;
        (elapsed < cooldown).then(|| (cooldown - elapsed.max(0)) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge(issued_at: i64) -> OtpChallenge {
        let key = ChallengeKey::new(OtpPurpose::Signup, "a@b.co");
        OtpChallenge {
            purpose: key.purpose,
            subject_address: key.address.clone(),
            code_hash: SealedCode::seal(&key, &OtpCode::from_number(1)),
            issued_at,
            expires_at: issued_at + 600,
            attempts_remaining: 5,
            last_issued_at: issued_at,
            display_name: None,
            undelivered: false,
        }
    }

    #[test]
    fn test_redis_key_layout() {
        let key = ChallengeKey::new(OtpPurpose::OrganizationEmail, "user@org.com");
        assert_eq!(key.redis_key(), "otp:organization_email:user@org.com");
    }

    #[test]
    fn test_expiry_boundary() {
        let c = challenge(1_000);
        assert!(!c.is_expired(1_600));
        assert!(c.is_expired(1_601));
    }

    #[test]
    fn test_cooldown_remaining() {
        let c = challenge(1_000);
        assert_eq!(c.cooldown_remaining(1_000, 60), Some(60));
        assert_eq!(c.cooldown_remaining(1_059, 60), Some(1));
        assert_eq!(c.cooldown_remaining(1_060, 60), None);
    }

    #[test]
    fn test_exhausted_challenge_has_no_cooldown() {
        let mut c = challenge(1_000);
        c.attempts_remaining = 0;
        assert_eq!(c.cooldown_remaining(1_010, 60), None);
    }

    #[test]
    fn test_undelivered_challenge_has_no_cooldown() {
        let mut c = challenge(1_000);
        c.undelivered = true;
        assert!(c.is_live(1_010));
        assert_eq!(c.cooldown_remaining(1_010, 60), None);
    }
}
