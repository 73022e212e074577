//! Notification channel for OTP delivery.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Serialize;
use thiserror::Error;

use crate::otp::OtpCode;
use trustgate_common::OtpPurpose;
use trustgate_common::constants::redis_keys;

/// One code on its way to an address
#[derive(Debug, Clone)]
pub struct OtpDelivery {
    pub purpose: OtpPurpose,
    pub address: String,
    pub code: OtpCode,
    pub display_name: Option<String>,
    pub expires_at: i64,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Worth retrying, the address itself is fine
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// The channel will never reach this address
    #[error("address rejected by channel: {0}")]
    InvalidAddress(String),
}

/// Dispatches codes to their recipients
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, delivery: &OtpDelivery) -> Result<(), DeliveryError>;
}

/// Job payload read by the external mailer
#[derive(Debug, Serialize)]
struct OutboxJob<'a> {
    purpose: OtpPurpose,
    address: &'a str,
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<&'a str>,
    expires_at: i64,
    subject: &'static str,
}

fn subject_for(purpose: OtpPurpose) -> &'static str {
    match purpose {
        OtpPurpose::Signup => "Your signup verification code",
        OtpPurpose::OrganizationEmail => "Verify your organization email",
        OtpPurpose::PasswordReset => "Your password reset code",
    }
}

/// Queues deliveries on a Redis list consumed by the mailer
#[derive(Clone)]
pub struct RedisOutboxNotifier {
    redis: ConnectionManager,
}

impl RedisOutboxNotifier {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl Notifier for RedisOutboxNotifier {
    async fn deliver(&self, delivery: &OtpDelivery) -> Result<(), DeliveryError> {
        let job = OutboxJob {
            purpose: delivery.purpose,
            address: &delivery.address,
            code: delivery.code.as_str(),
            display_name: delivery.display_name.as_deref(),
            expires_at: delivery.expires_at,
            subject: subject_for(delivery.purpose),
        };
        let payload = serde_json::to_string(&job)
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;

        let mut conn = self.redis.clone();
        let _: i64 = conn
            .lpush(redis_keys::OTP_OUTBOX, payload)
            .await
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;

        tracing::debug!(
            purpose = %delivery.purpose,
            address = %delivery.address,
            "Queued OTP delivery"
        );

        Ok(())
    }
}

/// Writes codes to the log. Development deployments only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, delivery: &OtpDelivery) -> Result<(), DeliveryError> {
        tracing::info!(
            purpose = %delivery.purpose,
            address = %delivery.address,
            code = delivery.code.as_str(),
            expires_at = delivery.expires_at,
            "📨 OTP code (development delivery)"
        );
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// What the recording notifier should do on the next call
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Script {
        Deliver,
        FailTransient,
        FailInvalid,
    }

    /// Captures deliveries so tests can read the code back
    #[derive(Debug)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<(OtpPurpose, String, String)>>,
        mode: Mutex<Script>,
    }

    impl Default for RecordingNotifier {
        fn default() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                mode: Mutex::new(Script::Deliver),
            }
        }
    }

    impl RecordingNotifier {
        pub fn set_mode(&self, mode: Script) {
            *self.mode.lock().unwrap() = mode;
        }

        pub fn last_code(&self) -> Option<String> {
            self.sent.lock().unwrap().last().map(|(_, _, code)| code.clone())
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn deliver(&self, delivery: &OtpDelivery) -> Result<(), DeliveryError> {
            let mode = *self.mode.lock().unwrap();
            match mode {
                Script::Deliver => {
                    self.sent.lock().unwrap().push((
                        delivery.purpose,
                        delivery.address.clone(),
                        delivery.code.as_str().to_string(),
                    ));
                    Ok(())
                }
                Script::FailTransient => Err(DeliveryError::Transient("smtp timeout".into())),
                Script::FailInvalid => Err(DeliveryError::InvalidAddress("mailbox does not exist".into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbox_job_shape() {
        let code = OtpCode::from_number(42);
        let job = OutboxJob {
            purpose: OtpPurpose::Signup,
            address: "a@b.co",
            code: code.as_str(),
            display_name: None,
            expires_at: 10,
            subject: subject_for(OtpPurpose::Signup),
        };
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["purpose"], "signup");
        assert_eq!(json["code"], "000042");
        assert!(json.get("display_name").is_none());
    }
}
