//! Signed session tokens.
//!
//! ed25519-signed tokens carrying the holder's capability claims, so
//! downstream services can gate actions without calling back.
//!
//! Token format: base64(user:expiry:capabilities:issuer:signature)
//!
//! Security properties:
//! - Tokens are bound to the issuing service's keypair
//! - Capability claims are a snapshot; refresh after every transition
//! - Expired tokens are rejected even with a valid signature

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{SessionError, SessionIssuer};
use crate::clock::Clock;
use crate::gate;
use crate::verification::IdentityStore;
use trustgate_common::{CapabilitySet, UserId};

/// Session token configuration
#[derive(Clone, Debug)]
pub struct SessionTokenConfig {
    /// Token validity duration in seconds
    pub token_ttl_secs: u64,
    /// Name of this issuer, embedded in every token
    pub issuer: String,
    /// Path to our private key file (32 raw bytes)
    pub private_key_path: Option<String>,
}

impl Default for SessionTokenConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: trustgate_common::constants::DEFAULT_SESSION_TTL_SECS,
            issuer: "gatekeeper".to_string(),
            private_key_path: None,
        }
    }
}

/// Decoded, verified token contents
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionClaims {
    pub user_id: UserId,
    /// Expiry timestamp (unix seconds)
    pub expiry: i64,
    pub capabilities: CapabilitySet,
    pub issuer: String,
}

/// A token handed to a user
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: i64,
    pub capabilities: CapabilitySet,
}

fn encode_capabilities(caps: CapabilitySet) -> String {
    let mut out = String::with_capacity(3);
    if caps.can_buy {
        out.push('b');
    }
    if caps.can_sell {
        out.push('s');
    }
    if caps.can_contact {
        out.push('c');
    }
    if out.is_empty() {
        out.push('-');
    }
    out
}

fn decode_capabilities(raw: &str) -> Result<CapabilitySet> {
    if raw == "-" {
        return Ok(CapabilitySet::default());
    }
    if raw.is_empty() || raw.chars().any(|c| !matches!(c, 'b' | 's' | 'c')) {
        bail!("Invalid capability claims: {}", raw);
    }
    Ok(CapabilitySet {
        can_buy: raw.contains('b'),
        can_sell: raw.contains('s'),
        can_contact: raw.contains('c'),
    })
}

/// Mints and validates session tokens
pub struct SessionTokenService {
    config: SessionTokenConfig,
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl SessionTokenService {
    /// Create a new token service
    pub fn new(config: SessionTokenConfig) -> Result<Self> {
        let signing_key = if let Some(ref path) = config.private_key_path {
            let key_bytes = std::fs::read(path).context("Failed to read session key file")?;

            if key_bytes.len() != 32 {
                bail!("Invalid session key length (expected 32 bytes)");
            }

            let mut bytes = [0u8; 32];
            bytes.copy_from_slice(&key_bytes);
            SigningKey::from_bytes(&bytes)
        } else {
            use rand_core::OsRng;
            tracing::warn!("Using ephemeral session key (tokens die on restart)");
            SigningKey::generate(&mut OsRng)
        };
        let verifying_key = signing_key.verifying_key();

        Ok(Self {
            config,
            signing_key,
            verifying_key,
        })
    }

    /// Get our public key as base64
    pub fn public_key_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.verifying_key.as_bytes())
    }

    /// Issue a token for `user_id` carrying `capabilities`
    pub fn mint(&self, user_id: &UserId, capabilities: CapabilitySet, now: i64) -> IssuedSession {
        let expiry = now + self.config.token_ttl_secs as i64;
        let payload = format!(
            "{}:{}:{}:{}",
            user_id,
            expiry,
            encode_capabilities(capabilities),
            self.config.issuer
        );

        let signature = self.signing_key.sign(payload.as_bytes());
        let sig_b64 = URL_SAFE_NO_PAD.encode(signature.to_bytes());
        let token = format!("{}:{}", payload, sig_b64);

        tracing::debug!(user_id = %user_id, expiry, "Issued session token");

        IssuedSession {
            token: URL_SAFE_NO_PAD.encode(token.as_bytes()),
            expires_at: expiry,
            capabilities,
        }
    }

    /// Validate a token presented by a client
    pub fn validate(&self, token: &str, now: i64) -> Result<SessionClaims> {
        let decoded = URL_SAFE_NO_PAD
            .decode(token)
            .context("Invalid token encoding")?;
        let token_str = String::from_utf8(decoded).context("Invalid token UTF-8")?;

        // Parse: user:expiry:capabilities:issuer:signature
        let parts: Vec<&str> = token_str.split(':').collect();
        let [user, expiry, caps, issuer, sig_b64] = parts.as_slice() else {
            bail!("Invalid token format (expected 5 parts, got {})", parts.len());
        };

        let expiry: i64 = expiry.parse().context("Invalid expiry timestamp")?;

        if *issuer != self.config.issuer {
            bail!("Token issued by {}, expected {}", issuer, self.config.issuer);
        }

        if expiry < now {
            bail!("Token expired (expired at {}, now is {})", expiry, now);
        }

        let sig_bytes = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .context("Invalid signature encoding")?;
        let sig_array: [u8; 64] = sig_bytes
            .as_slice()
            .try_into()
            .context("Invalid signature length")?;
        let signature = Signature::from_bytes(&sig_array);

        let payload = format!("{}:{}:{}:{}", user, expiry, caps, issuer);
        self.verifying_key
            .verify(payload.as_bytes(), &signature)
            .context("Invalid signature")?;

        Ok(SessionClaims {
            user_id: UserId::new(*user),
            expiry,
            capabilities: decode_capabilities(caps)?,
            issuer: issuer.to_string(),
        })
    }
}

/// Session issuer that re-mints tokens from the identity store's current
/// state and keeps the latest token per user for pickup.
pub struct TokenSessionIssuer {
    tokens: SessionTokenService,
    identity: Arc<dyn IdentityStore>,
    clock: Arc<dyn Clock>,
    latest: RwLock<HashMap<UserId, IssuedSession>>,
}

impl TokenSessionIssuer {
    pub fn new(
        tokens: SessionTokenService,
        identity: Arc<dyn IdentityStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tokens,
            identity,
            clock,
            latest: RwLock::new(HashMap::new()),
        }
    }

    /// Latest unexpired session minted for a user
    pub async fn current(&self, user_id: &UserId) -> Option<IssuedSession> {
        let now = self.clock.now();
        self.latest
            .read()
            .await
            .get(user_id)
            .filter(|session| session.expires_at >= now)
            .cloned()
    }

    pub fn validate(&self, token: &str) -> Result<SessionClaims> {
        self.tokens.validate(token, self.clock.now())
    }

    pub fn public_key_b64(&self) -> String {
        self.tokens.public_key_b64()
    }
}

#[async_trait]
impl SessionIssuer for TokenSessionIssuer {
    async fn refresh(&self, user_id: &UserId) -> Result<IssuedSession, SessionError> {
        let flags = self
            .identity
            .load_verification(user_id)
            .await?
            .ok_or_else(|| SessionError::UnknownUser(user_id.clone()))?;

        let now = self.clock.now();
        let capabilities = gate::derive(&flags.status());
        let session = self.tokens.mint(user_id, capabilities, now);

        let mut latest = self.latest.write().await;
        latest.retain(|_, s| s.expires_at >= now);
        latest.insert(user_id.clone(), session.clone());

        Ok(session)
    }
}
