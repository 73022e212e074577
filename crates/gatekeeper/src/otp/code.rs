//! OTP code generation, sealing, and constant-time matching.

use base64::{Engine, engine::general_purpose::STANDARD};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;

use super::ChallengeKey;
use trustgate_common::constants::OTP_CODE_DIGITS;

const CODE_SPACE: u32 = 1_000_000;
const SALT_LEN: usize = 16;

/// A plaintext one-time code. Only ever held in memory on its way to the
/// notification channel.
#[derive(Clone, PartialEq, Eq)]
pub struct OtpCode(String);

impl OtpCode {
    /// Build a code from its numeric value, keeping leading zeros
    pub fn from_number(value: u32) -> Self {
        Self(format!("{:0width$}", value % CODE_SPACE, width = OTP_CODE_DIGITS))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for OtpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OtpCode(******)")
    }
}

/// Source of fresh codes
pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> OtpCode;
}

/// Uniform codes over 000000-999999 from the thread CSPRNG
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> OtpCode {
        OtpCode::from_number(rand::rng().random_range(0..CODE_SPACE))
    }
}

/// Salted SHA-256 of a code, bound to the challenge key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedCode {
    /// Base64 salt
    pub salt: String,
    /// Base64 digest
    pub digest: String,
}

impl SealedCode {
    /// Seal a code for storage under `key`
    pub fn seal(key: &ChallengeKey, code: &OtpCode) -> Self {
        let mut salt = [0u8; SALT_LEN];
        rand::rng().fill(&mut salt);
        let digest = digest(&salt, key, code.as_str());

        Self {
            salt: STANDARD.encode(salt),
            digest: STANDARD.encode(digest),
        }
    }

    /// Check a submitted code. The digest comparison is constant-time.
    pub fn matches(&self, key: &ChallengeKey, candidate: &str) -> bool {
        let (Ok(salt), Ok(expected)) = (STANDARD.decode(&self.salt), STANDARD.decode(&self.digest))
        else {
            tracing::error!(key = %key, "Sealed code is not valid base64");
            return false;
        };

        let actual = digest(&salt, key, candidate.trim());
        bool::from(actual.as_slice().ct_eq(expected.as_slice()))
    }
}

fn digest(salt: &[u8], key: &ChallengeKey, code: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(key.purpose.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(key.address.as_bytes());
    hasher.update([0u8]);
    hasher.update(code.as_bytes());
    hasher.finalize().into()
}
