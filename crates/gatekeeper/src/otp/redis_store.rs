//! Redis-backed challenge store.
//!
//! Per-key atomicity comes from Lua scripts, which Redis runs without
//! interleaving other commands. Keys carry a native TTL slightly past the
//! challenge expiry, so late submissions still see `Expired` and the
//! background sweep has nothing to do.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::store::{ChallengeStore, IssueOutcome};
use super::{ChallengeKey, OtpChallenge};
use crate::storage::StoreError;

/// Extra key lifetime after `expires_at`
const EXPIRED_GRACE_SECS: i64 = 60;

/// KEYS[1] = challenge key
/// ARGV = record json, now, cooldown secs, key ttl
/// Returns {issued (0/1), retry_after or superseded (0/1)}
const ISSUE_SCRIPT: &str = r#"
local now = tonumber(ARGV[2])
local cooldown = tonumber(ARGV[3])
local superseded = 0
local current = redis.call('GET', KEYS[1])
if current then
  local c = cjson.decode(current)
  if now <= c.expires_at and c.attempts_remaining > 0 then
    local elapsed = now - c.last_issued_at
    if elapsed < 0 then elapsed = 0 end
    if elapsed < cooldown and not c.undelivered then
      return {0, cooldown - elapsed}
    end
    superseded = 1
  end
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[4])
return {1, superseded}
"#;

/// KEYS[1] = challenge key
/// ARGV = expected digest, expected attempts, replacement json ('' deletes)
/// Returns 1 when the stored record matched and was swapped
const REPLACE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then return 0 end
local c = cjson.decode(current)
if c.code_hash.digest ~= ARGV[1] or c.attempts_remaining ~= tonumber(ARGV[2]) then
  return 0
end
if ARGV[3] == '' then
  redis.call('DEL', KEYS[1])
else
  redis.call('SET', KEYS[1], ARGV[3], 'KEEPTTL')
end
return 1
"#;

/// KEYS[1] = challenge key, ARGV[1] = sealed digest of the record to drop
const DISCARD_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current then
  local c = cjson.decode(current)
  if c.code_hash.digest == ARGV[1] then
    redis.call('DEL', KEYS[1])
    return 1
  end
end
return 0
"#;

/// Challenge store on a shared Redis instance
#[derive(Clone)]
pub struct RedisChallengeStore {
    redis: ConnectionManager,
    issue: redis::Script,
    replace: redis::Script,
    discard: redis::Script,
}

impl RedisChallengeStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            issue: redis::Script::new(ISSUE_SCRIPT),
            replace: redis::Script::new(REPLACE_SCRIPT),
            discard: redis::Script::new(DISCARD_SCRIPT),
        }
    }

    fn key_ttl(challenge: &OtpChallenge, now: i64) -> i64 {
        (challenge.expires_at - now).max(1) + EXPIRED_GRACE_SECS
    }
}

#[async_trait]
impl ChallengeStore for RedisChallengeStore {
    async fn issue(
        &self,
        challenge: &OtpChallenge,
        cooldown_secs: u64,
        now: i64,
    ) -> Result<IssueOutcome, StoreError> {
        let mut conn = self.redis.clone();
        let value = serde_json::to_string(challenge)?;

        let reply: Vec<i64> = self
            .issue
            .key(challenge.key().redis_key())
            .arg(value)
            .arg(now)
            .arg(cooldown_secs)
            .arg(Self::key_ttl(challenge, now))
            .invoke_async(&mut conn)
            .await?;

        match reply.as_slice() {
            [1, superseded] => Ok(IssueOutcome::Issued {
                superseded: *superseded == 1,
            }),
            [0, retry_after] => Ok(IssueOutcome::Cooldown {
                retry_after_secs: (*retry_after).max(1) as u64,
            }),
            other => Err(StoreError::Corrupt(format!(
                "unexpected issue reply: {:?}",
                other
            ))),
        }
    }

    async fn replace_if_current(
        &self,
        current: &OtpChallenge,
        replacement: Option<&OtpChallenge>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let value = match replacement {
            Some(updated) => serde_json::to_string(updated)?,
            None => String::new(),
        };

        let swapped: i64 = self
            .replace
            .key(current.key().redis_key())
            .arg(&current.code_hash.digest)
            .arg(current.attempts_remaining)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;

        Ok(swapped == 1)
    }

    async fn discard(&self, challenge: &OtpChallenge) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let _: i64 = self
            .discard
            .key(challenge.key().redis_key())
            .arg(&challenge.code_hash.digest)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn peek(&self, key: &ChallengeKey) -> Result<Option<OtpChallenge>, StoreError> {
        let mut conn = self.redis.clone();
        let stored: Option<String> = conn.get(key.redis_key()).await?;

        match stored {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn sweep_expired(&self, _now: i64) -> Result<usize, StoreError> {
        // Keys expire natively
        Ok(0)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
