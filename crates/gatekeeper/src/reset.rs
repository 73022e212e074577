//! Password-reset authorizations.
//!
//! A verified password-reset code is exchanged for a short-lived, single
//! use grant. The service that actually changes the password redeems it.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::storage::StoreError;
use trustgate_common::constants::redis_keys;
use trustgate_common::{Account, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetGrant {
    pub token: String,
    pub user_id: UserId,
    pub email: String,
    pub expires_at: i64,
}

#[async_trait]
pub trait ResetAuthorizer: Send + Sync {
    /// Issue a grant allowing one password change for `account`
    async fn authorize(&self, account: &Account, now: i64) -> Result<ResetGrant, StoreError>;

    /// Consume a grant. `None` if unknown, used, or expired.
    async fn redeem(&self, token: &str, now: i64) -> Result<Option<ResetGrant>, StoreError>;
}

/// Generate a cryptographically secure grant token
fn generate_grant_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn new_grant(account: &Account, now: i64, ttl_secs: u64) -> ResetGrant {
    ResetGrant {
        token: generate_grant_token(),
        user_id: account.user_id.clone(),
        email: account.email.clone(),
        expires_at: now + ttl_secs as i64,
    }
}

#[derive(Debug)]
pub struct MemoryResetAuthorizer {
    ttl_secs: u64,
    grants: Mutex<HashMap<String, ResetGrant>>,
}

impl MemoryResetAuthorizer {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl_secs,
            grants: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ResetAuthorizer for MemoryResetAuthorizer {
    async fn authorize(&self, account: &Account, now: i64) -> Result<ResetGrant, StoreError> {
        let grant = new_grant(account, now, self.ttl_secs);
        let mut grants = self.grants.lock().await;
        grants.retain(|_, g| g.expires_at >= now);
        grants.insert(grant.token.clone(), grant.clone());
        Ok(grant)
    }

    async fn redeem(&self, token: &str, now: i64) -> Result<Option<ResetGrant>, StoreError> {
        let grant = self.grants.lock().await.remove(token);
        Ok(grant.filter(|g| g.expires_at >= now))
    }
}

/// Grants stored as `reset:{token}` with a native TTL
#[derive(Clone)]
pub struct RedisResetAuthorizer {
    redis: ConnectionManager,
    ttl_secs: u64,
}

impl RedisResetAuthorizer {
    pub fn new(redis: ConnectionManager, ttl_secs: u64) -> Self {
        Self { redis, ttl_secs }
    }

    fn key(token: &str) -> String {
        format!("{}{}", redis_keys::RESET_PREFIX, token)
    }
}

#[async_trait]
impl ResetAuthorizer for RedisResetAuthorizer {
    async fn authorize(&self, account: &Account, now: i64) -> Result<ResetGrant, StoreError> {
        use redis::AsyncCommands;

        let grant = new_grant(account, now, self.ttl_secs);
        let mut conn = self.redis.clone();
        conn.set_ex::<_, _, ()>(Self::key(&grant.token), serde_json::to_string(&grant)?, self.ttl_secs)
            .await?;
        Ok(grant)
    }

    async fn redeem(&self, token: &str, now: i64) -> Result<Option<ResetGrant>, StoreError> {
        let mut conn = self.redis.clone();
        // GETDEL keeps redemption single-use across instances
        let stored: Option<String> = redis::cmd("GETDEL")
            .arg(Self::key(token))
            .query_async(&mut conn)
            .await?;

        match stored {
            Some(data) => {
                let grant: ResetGrant = serde_json::from_str(&data)?;
                Ok((grant.expires_at >= now).then_some(grant))
            }
            None => Ok(None),
        }
    }
}
