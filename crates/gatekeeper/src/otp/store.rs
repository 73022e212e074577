//! Challenge persistence.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{ChallengeKey, OtpChallenge};
use crate::storage::StoreError;

/// Result of an issuance attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueOutcome {
    /// Stored; `superseded` is true when a prior challenge was replaced
    Issued { superseded: bool },
    /// A live challenge was issued too recently
    Cooldown { retry_after_secs: u64 },
}

/// Storage for outstanding challenges.
///
/// Every method is atomic per key: two concurrent `issue` calls can never
/// both succeed inside one cooldown window, and of two concurrent
/// `replace_if_current` calls made from the same snapshot only one wins.
/// A record is never absent from the store while it is being validated.
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Store `challenge`, replacing whatever exists for its key, unless a
    /// live challenge for that key was issued less than `cooldown_secs` ago.
    async fn issue(
        &self,
        challenge: &OtpChallenge,
        cooldown_secs: u64,
        now: i64,
    ) -> Result<IssueOutcome, StoreError>;

    /// Swap the record for `current`'s key with `replacement` (or delete it
    /// when `None`), provided the stored record is still the same issuance
    /// with the same attempt count as `current`. Returns whether it swapped.
    async fn replace_if_current(
        &self,
        current: &OtpChallenge,
        replacement: Option<&OtpChallenge>,
    ) -> Result<bool, StoreError>;

    /// Delete `challenge` if it is still the one stored for its key
    async fn discard(&self, challenge: &OtpChallenge) -> Result<(), StoreError>;

    /// Read without consuming
    async fn peek(&self, key: &ChallengeKey) -> Result<Option<OtpChallenge>, StoreError>;

    /// Delete every expired challenge, returning how many were removed
    async fn sweep_expired(&self, now: i64) -> Result<usize, StoreError>;

    /// Backend reachability check
    async fn ping(&self) -> Result<(), StoreError>;
}

/// In-process store guarded by a single async mutex
#[derive(Debug, Default)]
pub struct MemoryChallengeStore {
    challenges: Mutex<HashMap<ChallengeKey, OtpChallenge>>,
}

impl MemoryChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChallengeStore for MemoryChallengeStore {
    async fn issue(
        &self,
        challenge: &OtpChallenge,
        cooldown_secs: u64,
        now: i64,
    ) -> Result<IssueOutcome, StoreError> {
        let mut challenges = self.challenges.lock().await;
        let key = challenge.key();

        if let Some(existing) = challenges.get(&key) {
            if let Some(retry_after_secs) = existing.cooldown_remaining(now, cooldown_secs) {
                return Ok(IssueOutcome::Cooldown { retry_after_secs });
            }
        }

        let superseded = challenges
            .insert(key, challenge.clone())
            .is_some_and(|prior| prior.is_live(now));

        Ok(IssueOutcome::Issued { superseded })
    }

    async fn replace_if_current(
        &self,
        current: &OtpChallenge,
        replacement: Option<&OtpChallenge>,
    ) -> Result<bool, StoreError> {
        let mut challenges = self.challenges.lock().await;
        let key = current.key();
        if challenges.get(&key) != Some(current) {
            return Ok(false);
        }
        match replacement {
            Some(updated) => challenges.insert(key, updated.clone()),
            None => challenges.remove(&key),
        };
        Ok(true)
    }

    async fn discard(&self, challenge: &OtpChallenge) -> Result<(), StoreError> {
        let mut challenges = self.challenges.lock().await;
        let key = challenge.key();
        if challenges
            .get(&key)
            .is_some_and(|stored| stored.code_hash == challenge.code_hash)
        {
            challenges.remove(&key);
        }
        Ok(())
    }

    async fn peek(&self, key: &ChallengeKey) -> Result<Option<OtpChallenge>, StoreError> {
        Ok(self.challenges.lock().await.get(key).cloned())
    }

    async fn sweep_expired(&self, now: i64) -> Result<usize, StoreError> {
        let mut challenges = self.challenges.lock().await;
        let before = challenges.len();
        challenges.retain(|_, challenge| !challenge.is_expired(now));
        Ok(before - challenges.len())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
