//! Issuing, validating, and rate-limiting OTP challenges.
//!
//! The manager is purpose-agnostic: it proves control of an address and
//! nothing more. What a successful validation unlocks is decided by the
//! caller.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::address::{AddressError, normalize_address};
use super::code::{CodeGenerator, OtpCode, RandomCodeGenerator, SealedCode};
use super::store::{ChallengeStore, IssueOutcome};
use super::{ChallengeKey, OtpChallenge};
use crate::clock::Clock;
use crate::notify::{DeliveryError, Notifier, OtpDelivery};
use crate::storage::StoreError;
use trustgate_common::OtpPurpose;
use trustgate_common::constants::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_OTP_TTL_SECS, DEFAULT_RESEND_COOLDOWN_SECS,
};

/// Upper bound on optimistic retries within one validation
const MAX_SETTLE_ROUNDS: usize = 16;

/// Challenge lifetime and rate limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtpSettings {
    pub ttl_secs: u64,
    pub cooldown_secs: u64,
    pub max_attempts: u32,
}

impl Default for OtpSettings {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_OTP_TTL_SECS,
            cooldown_secs: DEFAULT_RESEND_COOLDOWN_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Receipt for a freshly issued challenge
#[derive(Debug, Clone, Serialize)]
pub struct ChallengeIssued {
    pub purpose: OtpPurpose,
    pub address: String,
    pub expires_at: i64,
    pub expires_in_secs: u64,
    /// Earliest moment another code can be requested, relative to now
    pub resend_after_secs: u64,
    /// A previous live code for the same address stopped working
    pub superseded: bool,
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] AddressError),

    #[error("a code was sent recently, retry after {retry_after_secs}s")]
    CooldownActive { retry_after_secs: u64 },

    /// `terminal` means the address can never be reached and the
    /// challenge was discarded
    #[error("code delivery failed: {reason}")]
    DeliveryFailed { reason: String, terminal: bool },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("no active code for this address")]
    NotFound,

    #[error("code expired")]
    Expired,

    #[error("incorrect code, {attempts_remaining} attempts remaining")]
    Mismatch { attempts_remaining: u32 },

    #[error("too many incorrect attempts")]
    TooManyAttempts,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ValidationError {
    /// The challenge is gone and a new code has to be requested
    pub fn requires_new_code(&self) -> bool {
        match self {
            Self::NotFound | Self::Expired | Self::TooManyAttempts => true,
            Self::Mismatch { attempts_remaining } => *attempts_remaining == 0,
            Self::Store(_) => false,
        }
    }
}

/// Issues and checks OTP challenges for every purpose
pub struct OtpChallengeManager {
    store: Arc<dyn ChallengeStore>,
    notifier: Arc<dyn Notifier>,
    codes: Arc<dyn CodeGenerator>,
    clock: Arc<dyn Clock>,
    settings: OtpSettings,
}

impl OtpChallengeManager {
    pub fn new(
        store: Arc<dyn ChallengeStore>,
        notifier: Arc<dyn Notifier>,
        codes: Arc<dyn CodeGenerator>,
        clock: Arc<dyn Clock>,
        settings: OtpSettings,
    ) -> Self {
        Self {
            store,
            notifier,
            codes,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> OtpSettings {
        self.settings
    }

    /// Issue a new code for `(purpose, address)` and hand it to the
    /// notification channel.
    ///
    /// A live code issued less than `cooldown_secs` ago blocks issuance.
    /// Otherwise any previous code for the key stops working.
    pub async fn request_challenge(
        &self,
        purpose: OtpPurpose,
        address: &str,
        display_name: Option<&str>,
    ) -> Result<ChallengeIssued, RequestError> {
        let address = normalize_address(address)?;
        let code = self.codes.generate();
        let (challenge, superseded) = self
            .issue(purpose, &address, &code, display_name)
            .await?;
        let key = challenge.key();

        let delivery = OtpDelivery {
            purpose,
            address: address.clone(),
            code,
            display_name: challenge.display_name.clone(),
            expires_at: challenge.expires_at,
        };

        match self.notifier.deliver(&delivery).await {
            Ok(()) => {}
            Err(DeliveryError::Transient(reason)) => {
                // Code stays valid in case the channel delivers late, but
                // an immediate retry may issue a fresh one
                tracing::warn!(key = %key, reason = %reason, "OTP delivery failed");
                let undelivered = OtpChallenge {
                    undelivered: true,
                    ..challenge.clone()
                };
                self.store
                    .replace_if_current(&challenge, Some(&undelivered))
                    .await?;
                return Err(RequestError::DeliveryFailed {
                    reason,
                    terminal: false,
                });
            }
            Err(DeliveryError::InvalidAddress(reason)) => {
                tracing::warn!(key = %key, reason = %reason, "OTP address undeliverable, discarding challenge");
                self.store.discard(&challenge).await?;
                return Err(RequestError::DeliveryFailed {
                    reason,
                    terminal: true,
                });
            }
        }

        tracing::info!(key = %key, superseded, expires_at = challenge.expires_at, "OTP challenge issued");
        Ok(self.receipt(&challenge, superseded))
    }

    /// Occupy `(purpose, address)` exactly as `request_challenge` would,
    /// cooldown included, but with a random code that is never sent.
    ///
    /// Lets callers answer for addresses they must not reveal as unknown.
    pub async fn hold_challenge(
        &self,
        purpose: OtpPurpose,
        address: &str,
    ) -> Result<ChallengeIssued, RequestError> {
        let address = normalize_address(address)?;
        let code = RandomCodeGenerator.generate();
        let (challenge, superseded) = self.issue(purpose, &address, &code, None).await?;

        tracing::debug!(key = %challenge.key(), "OTP challenge held without delivery");
        Ok(self.receipt(&challenge, superseded))
    }

    async fn issue(
        &self,
        purpose: OtpPurpose,
        address: &str,
        code: &OtpCode,
        display_name: Option<&str>,
    ) -> Result<(OtpChallenge, bool), RequestError> {
        let key = ChallengeKey::new(purpose, address);
        let now = self.clock.now();

        let challenge = OtpChallenge {
            purpose,
            subject_address: address.to_string(),
            code_hash: SealedCode::seal(&key, code),
            issued_at: now,
            expires_at: now + self.settings.ttl_secs as i64,
            attempts_remaining: self.settings.max_attempts,
            last_issued_at: now,
            display_name: display_name.map(str::to_string),
            undelivered: false,
        };

        match self
            .store
            .issue(&challenge, self.settings.cooldown_secs, now)
            .await?
        {
            IssueOutcome::Issued { superseded } => Ok((challenge, superseded)),
            IssueOutcome::Cooldown { retry_after_secs } => {
                tracing::debug!(key = %key, retry_after_secs, "OTP request during cooldown");
                Err(RequestError::CooldownActive { retry_after_secs })
            }
        }
    }

    fn receipt(&self, challenge: &OtpChallenge, superseded: bool) -> ChallengeIssued {
        ChallengeIssued {
            purpose: challenge.purpose,
            address: challenge.subject_address.clone(),
            expires_at: challenge.expires_at,
            expires_in_secs: self.settings.ttl_secs,
            resend_after_secs: self.settings.cooldown_secs,
            superseded,
        }
    }

    /// Check a submitted code.
    ///
    /// Success consumes the challenge. A mismatch costs one attempt; once
    /// the budget is spent the next submission fails with
    /// `TooManyAttempts` whatever the code. The record stays in the store
    /// throughout, so concurrent submissions and resends always see it.
    pub async fn validate_challenge(
        &self,
        purpose: OtpPurpose,
        address: &str,
        code: &str,
    ) -> Result<(), ValidationError> {
        let Ok(address) = normalize_address(address) else {
            return Err(ValidationError::NotFound);
        };
        let key = ChallengeKey::new(purpose, address);
        let now = self.clock.now();

        // Each lost race means another writer changed the record, which
        // the attempt budget bounds
        for _ in 0..MAX_SETTLE_ROUNDS {
            let Some(challenge) = self.store.peek(&key).await? else {
                tracing::debug!(key = %key, "No challenge to validate");
                return Err(ValidationError::NotFound);
            };

            if challenge.is_expired(now) {
                tracing::debug!(key = %key, expired_at = challenge.expires_at, "OTP challenge expired");
                self.store.replace_if_current(&challenge, None).await?;
                return Err(ValidationError::Expired);
            }

            if challenge.is_exhausted() {
                if !self.store.replace_if_current(&challenge, None).await? {
                    continue;
                }
                tracing::info!(key = %key, "OTP challenge retired after too many attempts");
                return Err(ValidationError::TooManyAttempts);
            }

            if challenge.code_hash.matches(&key, code) {
                if !self.store.replace_if_current(&challenge, None).await? {
                    continue;
                }
                tracing::info!(key = %key, "OTP challenge verified");
                return Ok(());
            }

            let spent = OtpChallenge {
                attempts_remaining: challenge.attempts_remaining - 1,
                ..challenge.clone()
            };
            if !self.store.replace_if_current(&challenge, Some(&spent)).await? {
                continue;
            }

            let attempts_remaining = spent.attempts_remaining;
            tracing::debug!(key = %key, attempts_remaining, "OTP mismatch");
            return Err(ValidationError::Mismatch { attempts_remaining });
        }

        tracing::warn!(key = %key, "OTP validation kept losing to concurrent writers");
        Err(StoreError::Backend(format!("contention on {}", key)).into())
    }

    /// Outstanding challenge for a key, if any
    pub async fn lookup(
        &self,
        purpose: OtpPurpose,
        address: &str,
    ) -> Result<Option<OtpChallenge>, StoreError> {
        let Ok(address) = normalize_address(address) else {
            return Ok(None);
        };
        self.store.peek(&ChallengeKey::new(purpose, address)).await
    }

    /// Seconds until a new code may be requested for a key
    pub async fn cooldown_remaining(
        &self,
        purpose: OtpPurpose,
        address: &str,
    ) -> Result<u64, StoreError> {
        let now = self.clock.now();
        Ok(self
            .lookup(purpose, address)
            .await?
            .and_then(|c| c.cooldown_remaining(now, self.settings.cooldown_secs))
            .unwrap_or(0))
    }

    /// Drop expired challenges
    pub async fn sweep(&self) -> Result<usize, StoreError> {
        self.store.sweep_expired(self.clock.now()).await
    }

    /// Challenge backend reachability
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }
}

/// Background worker that deletes expired challenges.
///
/// Validation re-checks expiry on its own; this only keeps the store small.
pub async fn sweep_worker(
    manager: Arc<OtpChallengeManager>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tracing::info!(interval_secs = interval.as_secs(), "🧹 Challenge sweep worker started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                match manager.sweep().await {
                    Ok(0) => {}
                    Ok(removed) => tracing::debug!(removed, "Swept expired challenges"),
                    Err(e) => tracing::error!(error = %e, "Challenge sweep failed"),
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("🧹 Challenge sweep worker shutting down...");
                break;
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FixedCodeGenerator;
    use super::*;
    use crate::clock::ManualClock;
    use crate::notify::testing::{RecordingNotifier, Script};
    use crate::otp::{MemoryChallengeStore, RandomCodeGenerator};
    use tokio_test::{assert_err, assert_ok};

    const ADDRESS: &str = "user@org.com";
    const PURPOSE: OtpPurpose = OtpPurpose::OrganizationEmail;

    struct Harness {
        manager: Arc<OtpChallengeManager>,
        notifier: Arc<RecordingNotifier>,
        clock: Arc<ManualClock>,
    }

    fn harness_with(codes: Arc<dyn CodeGenerator>) -> Harness {
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = ManualClock::new(1_700_000_000);
        let manager = Arc::new(OtpChallengeManager::new(
            Arc::new(MemoryChallengeStore::new()),
            notifier.clone(),
            codes,
            clock.clone(),
            OtpSettings::default(),
        ));
        Harness {
            manager,
            notifier,
            clock,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(FixedCodeGenerator(482_913)))
    }

    #[tokio::test]
    async fn test_request_delivers_code() {
        let h = harness_with(Arc::new(RandomCodeGenerator));
        let issued = assert_ok!(h.manager.request_challenge(PURPOSE, "User@Org.com", None).await);

        assert_eq!(issued.address, ADDRESS);
        assert_eq!(issued.expires_in_secs, 600);
        assert!(!issued.superseded);

        let code = h.notifier.last_code().unwrap();
        assert_eq!(code.len(), 6);
        assert_ok!(h.manager.validate_challenge(PURPOSE, ADDRESS, &code).await);
    }

    #[tokio::test]
    async fn test_invalid_address_rejected_before_issue() {
        let h = harness();
        let err = h.manager.request_challenge(PURPOSE, "not-an-email", None).await.unwrap_err();
        assert!(matches!(err, RequestError::InvalidAddress(_)));
        assert_eq!(h.notifier.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_single_use() {
        let h = harness();
        assert_ok!(h.manager.request_challenge(PURPOSE, ADDRESS, None).await);

        assert_ok!(h.manager.validate_challenge(PURPOSE, ADDRESS, "482913").await);
        let second = h.manager.validate_challenge(PURPOSE, ADDRESS, "482913").await;
        assert!(matches!(second, Err(ValidationError::NotFound)));
    }

    #[tokio::test]
    async fn test_attempt_budget() {
        let h = harness();
        assert_ok!(h.manager.request_challenge(PURPOSE, ADDRESS, None).await);

        for expected in (0..5).rev() {
            let result = h.manager.validate_challenge(PURPOSE, ADDRESS, "000000").await;
            assert!(
                matches!(result, Err(ValidationError::Mismatch { attempts_remaining }) if attempts_remaining == expected),
                "unexpected {result:?}"
            );
        }

        // Correct code no longer helps
        let sixth = h.manager.validate_challenge(PURPOSE, ADDRESS, "482913").await;
        assert!(matches!(sixth, Err(ValidationError::TooManyAttempts)));

        let after = h.manager.validate_challenge(PURPOSE, ADDRESS, "482913").await;
        assert!(matches!(after, Err(ValidationError::NotFound)));
    }

    #[tokio::test]
    async fn test_mismatch_then_success() {
        let h = harness();
        assert_ok!(h.manager.request_challenge(PURPOSE, ADDRESS, None).await);

        assert_err!(h.manager.validate_challenge(PURPOSE, ADDRESS, "111111").await);
        assert_ok!(h.manager.validate_challenge(PURPOSE, ADDRESS, "482913").await);
    }

    #[tokio::test]
    async fn test_cooldown_enforcement() {
        let h = harness();
        assert_ok!(h.manager.request_challenge(PURPOSE, ADDRESS, None).await);

        h.clock.advance(20);
        let second = h.manager.request_challenge(PURPOSE, ADDRESS, None).await;
        match second {
            Err(RequestError::CooldownActive { retry_after_secs }) => assert_eq!(retry_after_secs, 40),
            other => panic!("expected cooldown, got {other:?}"),
        }
        assert_eq!(h.manager.cooldown_remaining(PURPOSE, ADDRESS).await.unwrap(), 40);

        h.clock.advance(41);
        let third = assert_ok!(h.manager.request_challenge(PURPOSE, ADDRESS, None).await);
        assert!(third.superseded);
        assert_eq!(h.notifier.sent_count(), 2);
    }

    #[tokio::test]
    async fn test_cooldown_is_per_key() {
        let h = harness();
        assert_ok!(h.manager.request_challenge(PURPOSE, ADDRESS, None).await);
        assert_ok!(h.manager.request_challenge(OtpPurpose::PasswordReset, ADDRESS, None).await);
        assert_ok!(h.manager.request_challenge(PURPOSE, "other@org.com", None).await);
    }

    #[tokio::test]
    async fn test_reissue_invalidates_previous_code() {
        let h = harness_with(Arc::new(RandomCodeGenerator));
        assert_ok!(h.manager.request_challenge(PURPOSE, ADDRESS, None).await);
        let first = h.notifier.last_code().unwrap();

        h.clock.advance(60);
        assert_ok!(h.manager.request_challenge(PURPOSE, ADDRESS, None).await);
        let second = h.notifier.last_code().unwrap();

        if first != second {
            let stale = h.manager.validate_challenge(PURPOSE, ADDRESS, &first).await;
            assert!(matches!(stale, Err(ValidationError::Mismatch { .. })));
        }
        assert_ok!(h.manager.validate_challenge(PURPOSE, ADDRESS, &second).await);
    }

    #[tokio::test]
    async fn test_expiry() {
        let h = harness();
        assert_ok!(h.manager.request_challenge(PURPOSE, ADDRESS, None).await);

        h.clock.advance(601);
        let result = h.manager.validate_challenge(PURPOSE, ADDRESS, "482913").await;
        assert!(matches!(result, Err(ValidationError::Expired)));
        assert!(h.manager.lookup(PURPOSE, ADDRESS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_challenge_does_not_block_resend() {
        let h = harness_with(Arc::new(FixedCodeGenerator(1)));
        let short = OtpChallengeManager::new(
            Arc::new(MemoryChallengeStore::new()),
            h.notifier.clone(),
            Arc::new(FixedCodeGenerator(1)),
            h.clock.clone(),
            OtpSettings {
                ttl_secs: 30,
                cooldown_secs: 60,
                max_attempts: 5,
            },
        );
        assert_ok!(short.request_challenge(PURPOSE, ADDRESS, None).await);
        h.clock.advance(31);
        assert_ok!(short.request_challenge(PURPOSE, ADDRESS, None).await);
    }

    #[tokio::test]
    async fn test_transient_delivery_failure_keeps_challenge() {
        let h = harness();
        h.notifier.set_mode(Script::FailTransient);

        let err = h.manager.request_challenge(PURPOSE, ADDRESS, None).await.unwrap_err();
        assert!(matches!(err, RequestError::DeliveryFailed { terminal: false, .. }));
        let stored = h.manager.lookup(PURPOSE, ADDRESS).await.unwrap().unwrap();
        assert!(stored.undelivered);
        assert_eq!(h.manager.cooldown_remaining(PURPOSE, ADDRESS).await.unwrap(), 0);
        assert_ok!(h.manager.validate_challenge(PURPOSE, ADDRESS, "482913").await);
    }

    #[tokio::test]
    async fn test_retry_after_transient_failure_skips_cooldown() {
        let h = harness();
        h.notifier.set_mode(Script::FailTransient);
        assert_err!(h.manager.request_challenge(PURPOSE, ADDRESS, None).await);

        h.clock.advance(5);
        h.notifier.set_mode(Script::Deliver);
        let retried = assert_ok!(h.manager.request_challenge(PURPOSE, ADDRESS, None).await);
        assert!(retried.superseded);
        assert_eq!(h.notifier.sent_count(), 1);

        // Delivered code holds the cooldown again
        h.clock.advance(5);
        let again = h.manager.request_challenge(PURPOSE, ADDRESS, None).await;
        assert!(matches!(again, Err(RequestError::CooldownActive { retry_after_secs: 55 })));
    }

    #[tokio::test]
    async fn test_held_challenge_sends_nothing_but_holds_cooldown() {
        let h = harness();
        let held = assert_ok!(h.manager.hold_challenge(PURPOSE, "User@Org.com").await);
        assert_eq!(held.address, ADDRESS);
        assert_eq!(held.expires_in_secs, 600);
        assert_eq!(h.notifier.sent_count(), 0);

        h.clock.advance(5);
        let again = h.manager.hold_challenge(PURPOSE, ADDRESS).await;
        assert!(matches!(again, Err(RequestError::CooldownActive { retry_after_secs: 55 })));
        let sent = h.manager.request_challenge(PURPOSE, ADDRESS, None).await;
        assert!(matches!(sent, Err(RequestError::CooldownActive { retry_after_secs: 55 })));

        // The fixed code was never sealed into the held record
        let guess = h.manager.validate_challenge(PURPOSE, ADDRESS, "482913").await;
        assert!(matches!(guess, Err(ValidationError::Mismatch { attempts_remaining: 4 })));
    }

    #[tokio::test]
    async fn test_invalid_address_delivery_discards_challenge() {
        let h = harness();
        h.notifier.set_mode(Script::FailInvalid);

        let err = h.manager.request_challenge(PURPOSE, ADDRESS, None).await.unwrap_err();
        assert!(matches!(err, RequestError::DeliveryFailed { terminal: true, .. }));
        assert!(h.manager.lookup(PURPOSE, ADDRESS).await.unwrap().is_none());

        // No cooldown left behind
        h.notifier.set_mode(Script::Deliver);
        assert_ok!(h.manager.request_challenge(PURPOSE, ADDRESS, None).await);
    }

    #[tokio::test]
    async fn test_purposes_are_isolated() {
        let h = harness();
        assert_ok!(h.manager.request_challenge(OtpPurpose::Signup, ADDRESS, None).await);

        let wrong = h.manager.validate_challenge(OtpPurpose::PasswordReset, ADDRESS, "482913").await;
        assert!(matches!(wrong, Err(ValidationError::NotFound)));
        assert_ok!(h.manager.validate_challenge(OtpPurpose::Signup, ADDRESS, "482913").await);
    }

    #[tokio::test]
    async fn test_concurrent_validation_single_success() {
        let h = harness();
        assert_ok!(h.manager.request_challenge(PURPOSE, ADDRESS, None).await);

        let attempts = (0..8).map(|_| {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.validate_challenge(PURPOSE, ADDRESS, "482913").await })
        });

        let successes = futures::future::join_all(attempts)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(()))))
            .count();
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_concurrent_mismatches_each_cost_an_attempt() {
        let h = harness();
        assert_ok!(h.manager.request_challenge(PURPOSE, ADDRESS, None).await);

        let attempts = (0..5).map(|_| {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.validate_challenge(PURPOSE, ADDRESS, "000000").await })
        });

        let mut remaining: Vec<u32> = futures::future::join_all(attempts)
            .await
            .into_iter()
            .map(|r| match r.unwrap() {
                Err(ValidationError::Mismatch { attempts_remaining }) => attempts_remaining,
                other => panic!("expected mismatch, got {other:?}"),
            })
            .collect();
        remaining.sort_unstable();
        assert_eq!(remaining, vec![0, 1, 2, 3, 4]);

        let stored = h.manager.lookup(PURPOSE, ADDRESS).await.unwrap().unwrap();
        assert!(stored.is_exhausted());
    }

    #[tokio::test]
    async fn test_pending_mismatch_keeps_challenge_visible() {
        let store = Arc::new(GatedStore::default());
        let clock = ManualClock::new(1_700_000_000);
        let manager = Arc::new(OtpChallengeManager::new(
            store.clone(),
            Arc::new(RecordingNotifier::default()),
            Arc::new(FixedCodeGenerator(482_913)),
            clock.clone(),
            OtpSettings::default(),
        ));
        assert_ok!(manager.request_challenge(PURPOSE, ADDRESS, None).await);

        let wrong = tokio::spawn({
            let manager = manager.clone();
            async move { manager.validate_challenge(PURPOSE, ADDRESS, "000000").await }
        });
        store.entered.notified().await;

        // A mismatch is mid-flight: the cooldown and the correct code both still apply
        clock.advance(10);
        let resend = manager.request_challenge(PURPOSE, ADDRESS, None).await;
        assert!(matches!(resend, Err(RequestError::CooldownActive { retry_after_secs: 50 })));
        assert_ok!(manager.validate_challenge(PURPOSE, ADDRESS, "482913").await);

        store.release.notify_one();
        let late = wrong.await.unwrap();
        assert!(matches!(late, Err(ValidationError::NotFound)));
    }

    /// Memory store that parks the first attempt decrement until released
    #[derive(Default)]
    struct GatedStore {
        inner: MemoryChallengeStore,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
        gated: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl ChallengeStore for GatedStore {
        async fn issue(
            &self,
            challenge: &OtpChallenge,
            cooldown_secs: u64,
            now: i64,
        ) -> Result<IssueOutcome, StoreError> {
            self.inner.issue(challenge, cooldown_secs, now).await
        }

        async fn replace_if_current(
            &self,
            current: &OtpChallenge,
            replacement: Option<&OtpChallenge>,
        ) -> Result<bool, StoreError> {
            let decrement = replacement
                .is_some_and(|r| r.attempts_remaining < current.attempts_remaining);
            if decrement && !self.gated.swap(true, std::sync::atomic::Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.replace_if_current(current, replacement).await
        }

        async fn discard(&self, challenge: &OtpChallenge) -> Result<(), StoreError> {
            self.inner.discard(challenge).await
        }

        async fn peek(&self, key: &ChallengeKey) -> Result<Option<OtpChallenge>, StoreError> {
            self.inner.peek(key).await
        }

        async fn sweep_expired(&self, now: i64) -> Result<usize, StoreError> {
            self.inner.sweep_expired(now).await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            self.inner.ping().await
        }
    }

    #[tokio::test]
    async fn test_sweep_removes_expired() {
        let h = harness();
        assert_ok!(h.manager.request_challenge(PURPOSE, ADDRESS, None).await);
        assert_eq!(h.manager.sweep().await.unwrap(), 0);

        h.clock.advance(601);
        assert_eq!(h.manager.sweep().await.unwrap(), 1);
    }

    #[test]
    fn test_requires_new_code() {
        assert!(ValidationError::Expired.requires_new_code());
        assert!(ValidationError::Mismatch { attempts_remaining: 0 }.requires_new_code());
        assert!(!ValidationError::Mismatch { attempts_remaining: 3 }.requires_new_code());
    }
}
