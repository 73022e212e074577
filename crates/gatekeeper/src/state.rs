//! Application state and shared resources.

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::config::{AppConfig, Backend};
use crate::notify::{LogNotifier, Notifier, RedisOutboxNotifier};
use crate::orchestrator::{FlowPolicy, VerificationOrchestrator};
use crate::otp::{
    ChallengeStore, MemoryChallengeStore, OtpChallengeManager, RandomCodeGenerator,
    RedisChallengeStore,
};
use crate::reset::{MemoryResetAuthorizer, RedisResetAuthorizer, ResetAuthorizer};
use crate::session::{
    SessionSynchronizer, SessionTokenConfig, SessionTokenService, TokenSessionIssuer,
};
use crate::verification::{
    IdentityStore, MemoryIdentityStore, RedisIdentityStore, VerificationStateMachine,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,

    /// Flow façade used by every handler
    pub orchestrator: Arc<VerificationOrchestrator>,

    /// Challenge manager (shared with the sweep worker)
    pub otp: Arc<OtpChallengeManager>,

    /// Session token issuer
    pub sessions: Arc<TokenSessionIssuer>,
}

/// Backing stores for one deployment
struct Backends {
    challenges: Arc<dyn ChallengeStore>,
    identity: Arc<dyn IdentityStore>,
    resets: Arc<dyn ResetAuthorizer>,
    redis: Option<ConnectionManager>,
}

impl AppState {
    /// Create new application state, connecting to Redis when configured
    pub async fn new(config: AppConfig) -> Result<Self> {
        let backends = match config.backend {
            Backend::Redis => {
                // Connect to Redis with connection manager (handles reconnection)
                let client = redis::Client::open(config.redis_url.as_str())
                    .context("Failed to create Redis client")?;

                let redis = ConnectionManager::new(client)
                    .await
                    .context("Failed to connect to Redis")?;

                tracing::info!("✅ Redis connected: {}", config.redis_url);

                Backends {
                    challenges: Arc::new(RedisChallengeStore::new(redis.clone())),
                    identity: Arc::new(RedisIdentityStore::new(redis.clone())),
                    resets: Arc::new(RedisResetAuthorizer::new(
                        redis.clone(),
                        config.password_reset.grant_ttl_secs,
                    )),
                    redis: Some(redis),
                }
            }
            Backend::Memory => {
                tracing::warn!("⚠️ Using in-memory backend, all state is lost on restart");
                Backends {
                    challenges: Arc::new(MemoryChallengeStore::new()),
                    identity: Arc::new(MemoryIdentityStore::new()),
                    resets: Arc::new(MemoryResetAuthorizer::new(
                        config.password_reset.grant_ttl_secs,
                    )),
                    redis: None,
                }
            }
        };

        let notifier: Arc<dyn Notifier> = match (&backends.redis, config.dev.log_codes) {
            (_, true) => {
                tracing::warn!("⚠️ OTP codes are written to the log (dev.log_codes)");
                Arc::new(LogNotifier)
            }
            (Some(redis), false) => Arc::new(RedisOutboxNotifier::new(redis.clone())),
            (None, false) => anyhow::bail!("No delivery channel configured for OTP codes"),
        };

        let tokens = SessionTokenService::new(SessionTokenConfig {
            token_ttl_secs: config.session.token_ttl_secs,
            private_key_path: config.session.private_key_path.clone(),
            ..Default::default()
        })?;

        Ok(Self::assemble(config, backends, notifier, tokens))
    }

    fn assemble(
        config: AppConfig,
        backends: Backends,
        notifier: Arc<dyn Notifier>,
        tokens: SessionTokenService,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let otp = Arc::new(OtpChallengeManager::new(
            backends.challenges,
            notifier,
            Arc::new(RandomCodeGenerator),
            clock.clone(),
            config.otp.settings(),
        ));

        let machine = Arc::new(VerificationStateMachine::new(
            backends.identity.clone(),
            clock.clone(),
        ));

        let sessions = Arc::new(TokenSessionIssuer::new(
            tokens,
            backends.identity.clone(),
            clock.clone(),
        ));
        let synchronizer = Arc::new(SessionSynchronizer::new(
            sessions.clone(),
            Duration::from_millis(config.session.refresh_retry_delay_ms),
        ));

        let policy = FlowPolicy {
            blocked_domains: config.organization.blocked_domain_set(),
            verification_bypass: config.dev.verification_bypass,
        };

        let orchestrator = Arc::new(VerificationOrchestrator::new(
            otp.clone(),
            machine,
            backends.identity,
            synchronizer,
            backends.resets,
            clock,
            policy,
        ));

        tracing::info!(
            environment = ?config.environment,
            backend = ?config.backend,
            blocked_domains = config.organization.blocked_domains.len(),
            "Verification services initialized"
        );

        Self {
            config: Arc::new(config),
            orchestrator,
            otp,
            sessions,
        }
    }

    /// State over an already wired orchestrator
    #[cfg(test)]
    pub fn from_parts(
        config: AppConfig,
        orchestrator: Arc<VerificationOrchestrator>,
        otp: Arc<OtpChallengeManager>,
        sessions: Arc<TokenSessionIssuer>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            orchestrator,
            otp,
            sessions,
        }
    }
}
