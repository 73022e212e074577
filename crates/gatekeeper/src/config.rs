//! Configuration management for Gatekeeper.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use trustgate_common::constants::{
    DEFAULT_BLOCKED_DOMAINS, DEFAULT_LISTEN_ADDR, DEFAULT_MAX_ATTEMPTS, DEFAULT_OTP_TTL_SECS,
    DEFAULT_REDIS_URL, DEFAULT_RESEND_COOLDOWN_SECS, DEFAULT_RESET_GRANT_TTL_SECS,
    DEFAULT_SESSION_REFRESH_RETRY_MS, DEFAULT_SESSION_TTL_SECS, DEFAULT_SWEEP_INTERVAL_SECS,
};

use crate::otp::OtpSettings;

/// Deployment environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    #[default]
    Production,
}

/// Where challenges, accounts, and grants live
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Redis,
    /// Process-local maps, lost on restart
    Memory,
}

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default)]
    pub environment: Environment,

    #[serde(default)]
    pub backend: Backend,

    /// Per-request timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub otp: OtpConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub password_reset: PasswordResetConfig,

    #[serde(default)]
    pub organization: OrganizationConfig,

    #[serde(default)]
    pub dev: DevConfig,
}

/// One-time-passcode configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OtpConfig {
    /// Challenge validity in seconds
    #[serde(default = "default_otp_ttl")]
    pub ttl_secs: u64,

    /// Minimum spacing between two codes for the same address
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    /// Failed validations allowed per challenge
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Expired challenge sweep interval
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_otp_ttl(),
            cooldown_secs: default_cooldown(),
            max_attempts: default_max_attempts(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl OtpConfig {
    pub fn settings(&self) -> OtpSettings {
        OtpSettings {
            ttl_secs: self.ttl_secs,
            cooldown_secs: self.cooldown_secs,
            max_attempts: self.max_attempts,
        }
    }
}

/// Session token configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Token validity in seconds
    #[serde(default = "default_session_ttl")]
    pub token_ttl_secs: u64,

    /// Delay before the second refresh after a verification
    #[serde(default = "default_refresh_retry")]
    pub refresh_retry_delay_ms: u64,

    /// 32-byte ed25519 private key. Ephemeral key if unset.
    #[serde(default)]
    pub private_key_path: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: default_session_ttl(),
            refresh_retry_delay_ms: default_refresh_retry(),
            private_key_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordResetConfig {
    #[serde(default = "default_grant_ttl")]
    pub grant_ttl_secs: u64,
}

impl Default for PasswordResetConfig {
    fn default() -> Self {
        Self {
            grant_ttl_secs: default_grant_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrganizationConfig {
    /// Personal mail domains refused by the organization flow
    #[serde(default = "default_blocked_domains")]
    pub blocked_domains: Vec<String>,
}

impl Default for OrganizationConfig {
    fn default() -> Self {
        Self {
            blocked_domains: default_blocked_domains(),
        }
    }
}

impl OrganizationConfig {
    pub fn blocked_domain_set(&self) -> HashSet<String> {
        self.blocked_domains
            .iter()
            .map(|d| d.trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect()
    }
}

/// Development-only switches
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DevConfig {
    /// Mount the complete-verification bypass route
    #[serde(default)]
    pub verification_bypass: bool,

    /// Log OTP codes instead of queueing them for the mailer
    #[serde(default)]
    pub log_codes: bool,
}

// Default value functions
fn default_redis_url() -> String { DEFAULT_REDIS_URL.to_string() }
fn default_listen_addr() -> String { DEFAULT_LISTEN_ADDR.to_string() }
fn default_request_timeout() -> u64 { 10 }
fn default_otp_ttl() -> u64 { DEFAULT_OTP_TTL_SECS }
fn default_cooldown() -> u64 { DEFAULT_RESEND_COOLDOWN_SECS }
fn default_max_attempts() -> u32 { DEFAULT_MAX_ATTEMPTS }
fn default_sweep_interval() -> u64 { DEFAULT_SWEEP_INTERVAL_SECS }
fn default_session_ttl() -> u64 { DEFAULT_SESSION_TTL_SECS }
fn default_refresh_retry() -> u64 { DEFAULT_SESSION_REFRESH_RETRY_MS }
fn default_grant_ttl() -> u64 { DEFAULT_RESET_GRANT_TTL_SECS }

fn default_blocked_domains() -> Vec<String> {
    DEFAULT_BLOCKED_DOMAINS.iter().map(|d| d.to_string()).collect()
}

impl AppConfig {
    /// Load configuration from file, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let settings = config::Config::builder()
                .add_source(config::File::with_name(config_path))
                .build()
                .context("Failed to load config file")?;

            settings
                .try_deserialize()
                .context("Failed to parse config")?
        } else {
            // Use defaults if config file doesn't exist
            tracing::warn!("Config file not found, using defaults");
            Self::default()
        };

        // Apply CLI overrides
        if let Some(ref redis_url) = args.redis_url {
            config.redis_url = redis_url.clone();
        }
        if let Some(ref listen) = args.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(backend) = args.backend {
            config.backend = backend;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run safely with
    pub fn validate(&self) -> Result<()> {
        let otp = &self.otp;
        if otp.ttl_secs == 0 {
            bail!("otp.ttl_secs must be positive");
        }
        if otp.max_attempts == 0 {
            bail!("otp.max_attempts must be positive");
        }
        if otp.cooldown_secs >= otp.ttl_secs {
            bail!(
                "otp.cooldown_secs ({}) must be smaller than otp.ttl_secs ({})",
                otp.cooldown_secs,
                otp.ttl_secs
            );
        }
        if otp.sweep_interval_secs == 0 {
            bail!("otp.sweep_interval_secs must be positive");
        }
        if self.session.token_ttl_secs == 0 {
            bail!("session.token_ttl_secs must be positive");
        }
        if self.password_reset.grant_ttl_secs == 0 {
            bail!("password_reset.grant_ttl_secs must be positive");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be positive");
        }

        if self.backend == Backend::Memory && !self.dev.log_codes {
            bail!("the memory backend has no mail outbox, enable dev.log_codes");
        }

        if self.environment != Environment::Development {
            if self.dev.verification_bypass {
                bail!("dev.verification_bypass is only allowed in the development environment");
            }
            if self.dev.log_codes {
                bail!("dev.log_codes is only allowed in the development environment");
            }
        }

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            listen_addr: default_listen_addr(),
            environment: Environment::default(),
            backend: Backend::default(),
            request_timeout_secs: default_request_timeout(),
            otp: OtpConfig::default(),
            session: SessionConfig::default(),
            password_reset: PasswordResetConfig::default(),
            organization: OrganizationConfig::default(),
            dev: DevConfig::default(),
        }
    }
}
