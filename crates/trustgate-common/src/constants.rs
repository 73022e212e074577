//! Shared constants for Trustgate components.

/// Default Redis connection URL
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default Gatekeeper HTTP listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8890";

/// OTP challenge validity (10 minutes)
pub const DEFAULT_OTP_TTL_SECS: u64 = 600;

/// Minimum spacing between two OTP issuances for the same key
pub const DEFAULT_RESEND_COOLDOWN_SECS: u64 = 60;

/// Failed validations allowed before a challenge is discarded
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Number of digits in an OTP code
pub const OTP_CODE_DIGITS: usize = 6;

/// Expired challenge sweep interval (seconds)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Delay before the second post-verification session refresh
pub const DEFAULT_SESSION_REFRESH_RETRY_MS: u64 = 500;

/// Session token validity (1 hour)
pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

/// Password reset grant validity (15 minutes)
pub const DEFAULT_RESET_GRANT_TTL_SECS: u64 = 900;

/// Personal mail providers refused by the organization-email flow
pub const DEFAULT_BLOCKED_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "yahoo.com",
    "hotmail.com",
    "outlook.com",
    "live.com",
    "icloud.com",
    "aol.com",
    "proton.me",
    "protonmail.com",
];

/// Redis key prefixes
pub mod redis_keys {
    /// OTP challenge: otp:{purpose}:{address}
    pub const OTP_PREFIX: &str = "otp:";

    /// User record hash: user:{user_id}
    pub const USER_PREFIX: &str = "user:";

    /// Email index: user_email:{address} -> user_id
    pub const USER_EMAIL_PREFIX: &str = "user_email:";

    /// Password reset grant: reset:{token}
    pub const RESET_PREFIX: &str = "reset:";

    /// Outbound OTP delivery jobs (list)
    pub const OTP_OUTBOX: &str = "outbox:otp";
}

/// HTTP header names
pub mod headers {
    /// Authenticated caller id (set by the upstream auth proxy)
    pub const X_USER_ID: &str = "X-User-Id";
}
