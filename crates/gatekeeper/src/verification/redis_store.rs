//! Redis-backed identity store.
//!
//! Layout: `user:{id}` hash holding the account and its flags, and
//! `user_email:{address}` pointing back at the id. Flag writes go through
//! a script that only ever raises fields, so concurrent marks on the same
//! user never undo each other.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::HashMap;

use super::store::{AccountError, IdentityStore, generate_user_id};
use crate::storage::StoreError;
use trustgate_common::constants::redis_keys;
use trustgate_common::{Account, UserId, VerificationFlags};

/// KEYS[1] = user hash
/// ARGV = org flag, identity flag, submitted flag, org address, updated_at
const RAISE_FLAGS_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return nil
end
if ARGV[1] == '1' then redis.call('HSET', KEYS[1], 'organization_email_verified', '1') end
if ARGV[2] == '1' then redis.call('HSET', KEYS[1], 'identity_verified', '1') end
if ARGV[3] == '1' then redis.call('HSET', KEYS[1], 'identity_submitted', '1') end
if ARGV[4] ~= '' then redis.call('HSET', KEYS[1], 'organization_email', ARGV[4]) end
local updated = tonumber(redis.call('HGET', KEYS[1], 'updated_at') or '0')
if tonumber(ARGV[5]) > updated then
  redis.call('HSET', KEYS[1], 'updated_at', ARGV[5])
end
return redis.call('HGETALL', KEYS[1])
"#;

/// KEYS[1] = email index, KEYS[2] = user hash
/// ARGV = user id, then field/value pairs for the hash
/// Returns 0 when the address is already claimed
const CREATE_ACCOUNT_SCRIPT: &str = r#"
if not redis.call('SET', KEYS[1], ARGV[1], 'NX') then
  return 0
end
redis.call('HSET', KEYS[2], unpack(ARGV, 2))
return 1
"#;

#[derive(Clone)]
pub struct RedisIdentityStore {
    redis: ConnectionManager,
    create_account: redis::Script,
    raise_flags: redis::Script,
}

impl RedisIdentityStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            create_account: redis::Script::new(CREATE_ACCOUNT_SCRIPT),
            raise_flags: redis::Script::new(RAISE_FLAGS_SCRIPT),
        }
    }

    fn user_key(user_id: &UserId) -> String {
        format!("{}{}", redis_keys::USER_PREFIX, user_id)
    }

    fn email_key(email: &str) -> String {
        format!("{}{}", redis_keys::USER_EMAIL_PREFIX, email)
    }
}

fn flag(fields: &HashMap<String, String>, name: &str) -> bool {
    fields.get(name).is_some_and(|v| v == "1")
}

fn parse_i64(fields: &HashMap<String, String>, name: &str) -> Result<i64, StoreError> {
    fields
        .get(name)
        .map(|v| v.parse::<i64>().map_err(|_| StoreError::Corrupt(format!("bad {name}: {v}"))))
        .transpose()
        .map(|v| v.unwrap_or(0))
}

fn account_from(user_id: &UserId, fields: &HashMap<String, String>) -> Result<Account, StoreError> {
    let email = fields
        .get("email")
        .cloned()
        .ok_or_else(|| StoreError::Corrupt(format!("user {user_id} has no email")))?;

    Ok(Account {
        user_id: user_id.clone(),
        email,
        display_name: fields.get("display_name").cloned(),
        created_at: parse_i64(fields, "created_at")?,
    })
}

fn flags_from(fields: &HashMap<String, String>) -> Result<VerificationFlags, StoreError> {
    Ok(VerificationFlags {
        organization_email_verified: flag(fields, "organization_email_verified"),
        identity_verified: flag(fields, "identity_verified"),
        identity_submitted: flag(fields, "identity_submitted"),
        organization_email: fields.get("organization_email").cloned(),
        updated_at: parse_i64(fields, "updated_at")?,
    })
}

fn account_fields(email: &str, display_name: Option<&str>, now: i64) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("email", email.to_string()),
        ("created_at", now.to_string()),
        ("updated_at", now.to_string()),
        ("organization_email_verified", "0".to_string()),
        ("identity_verified", "0".to_string()),
        ("identity_submitted", "0".to_string()),
    ];
    if let Some(name) = display_name {
        fields.push(("display_name", name.to_string()));
    }
    fields
}

fn bit(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}

#[async_trait]
impl IdentityStore for RedisIdentityStore {
    async fn create_account(
        &self,
        email: &str,
        display_name: Option<&str>,
        now: i64,
    ) -> Result<Account, AccountError> {
        let mut conn = self.redis.clone();
        let user_id = generate_user_id();

        // Index claim and hash write land together, or not at all
        let mut invocation = self.create_account.prepare_invoke();
        invocation
            .key(Self::email_key(email))
            .key(Self::user_key(&user_id))
            .arg(user_id.as_str());
        for (field, value) in account_fields(email, display_name, now) {
            invocation.arg(field).arg(value);
        }

        let claimed: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(StoreError::from)?;
        if claimed == 0 {
            return Err(AccountError::AlreadyExists);
        }

        Ok(Account {
            user_id,
            email: email.to_string(),
            display_name: display_name.map(str::to_string),
            created_at: now,
        })
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let mut conn = self.redis.clone();
        let id: Option<String> = conn.get(Self::email_key(email)).await?;

        match id {
            Some(id) => self.load_account(&UserId::new(id)).await,
            None => Ok(None),
        }
    }

    async fn load_account(&self, user_id: &UserId) -> Result<Option<Account>, StoreError> {
        let mut conn = self.redis.clone();
        let fields: HashMap<String, String> = conn.hgetall(Self::user_key(user_id)).await?;

        if fields.is_empty() {
            return Ok(None);
        }
        account_from(user_id, &fields).map(Some)
    }

    async fn load_verification(
        &self,
        user_id: &UserId,
    ) -> Result<Option<VerificationFlags>, StoreError> {
        let mut conn = self.redis.clone();
        let fields: HashMap<String, String> = conn.hgetall(Self::user_key(user_id)).await?;

        if fields.is_empty() {
            return Ok(None);
        }
        flags_from(&fields).map(Some)
    }

    async fn save_verification(
        &self,
        user_id: &UserId,
        flags: &VerificationFlags,
    ) -> Result<Option<VerificationFlags>, StoreError> {
        let mut conn = self.redis.clone();
        let reply: Option<HashMap<String, String>> = self
            .raise_flags
            .key(Self::user_key(user_id))
            .arg(bit(flags.organization_email_verified))
            .arg(bit(flags.identity_verified))
            .arg(bit(flags.identity_submitted))
            .arg(flags.organization_email.as_deref().unwrap_or(""))
            .arg(flags.updated_at)
            .invoke_async(&mut conn)
            .await?;

        reply.map(|fields| flags_from(&fields)).transpose()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
