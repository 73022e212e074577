//! Post-verification session refresh.
//!
//! The identity store can briefly serve the pre-transition state right
//! after a write, so a single refresh may mint a token with stale claims.
//! We refresh immediately, wait, and refresh once more. Failures are only
//! logged: the stored verification state is already correct.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::SessionIssuer;
use trustgate_common::UserId;

pub struct SessionSynchronizer {
    issuer: Arc<dyn SessionIssuer>,
    retry_delay: Duration,
}

impl SessionSynchronizer {
    pub fn new(issuer: Arc<dyn SessionIssuer>, retry_delay: Duration) -> Self {
        Self {
            issuer,
            retry_delay,
        }
    }

    /// Refresh now, then once more after the retry delay. Never fails.
    pub async fn sync_after_verification(&self, user_id: &UserId) {
        self.attempt(user_id, 1).await;
        tokio::time::sleep(self.retry_delay).await;
        self.attempt(user_id, 2).await;
    }

    /// Run [`Self::sync_after_verification`] in the background
    pub fn spawn(self: &Arc<Self>, user_id: UserId) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.sync_after_verification(&user_id).await })
    }

    async fn attempt(&self, user_id: &UserId, attempt: u8) {
        match self.issuer.refresh(user_id).await {
            Ok(session) => tracing::debug!(
                user_id = %user_id,
                attempt,
                can_buy = session.capabilities.can_buy,
                can_sell = session.capabilities.can_sell,
                "Session refreshed"
            ),
            Err(e) => tracing::warn!(
                user_id = %user_id,
                attempt,
                error = %e,
                "Session refresh failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{IssuedSession, SessionError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use trustgate_common::CapabilitySet;

    /// Fails the first `failures` calls
    #[derive(Default)]
    struct FlakyIssuer {
        calls: AtomicUsize,
        failures: usize,
    }

    #[async_trait]
    impl SessionIssuer for FlakyIssuer {
        async fn refresh(&self, user_id: &UserId) -> Result<IssuedSession, SessionError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(SessionError::UnknownUser(user_id.clone()));
            }
            Ok(IssuedSession {
                token: format!("token-{call}"),
                expires_at: 0,
                capabilities: CapabilitySet::default(),
            })
        }
    }

    #[tokio::test]
    async fn test_refreshes_twice() {
        let issuer = Arc::new(FlakyIssuer::default());
        let sync = SessionSynchronizer::new(issuer.clone(), Duration::from_millis(5));

        sync.sync_after_verification(&UserId::from("usr_1")).await;
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let issuer = Arc::new(FlakyIssuer {
            failures: 2,
            ..Default::default()
        });
        let sync = Arc::new(SessionSynchronizer::new(issuer.clone(), Duration::from_millis(5)));

        sync.spawn(UserId::from("usr_1")).await.unwrap();
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_waits_between_attempts() {
        let issuer = Arc::new(FlakyIssuer::default());
        let sync = SessionSynchronizer::new(issuer, Duration::from_millis(40));

        let started = std::time::Instant::now();
        sync.sync_after_verification(&UserId::from("usr_1")).await;
        assert!(started.elapsed() >= Duration::from_millis(40));
    }
}
