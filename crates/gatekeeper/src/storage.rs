//! Storage error shared by the challenge, identity, and grant stores.

use thiserror::Error;
use trustgate_common::TrustgateError;

/// Failure talking to a backing store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection or command failure
    #[error("backend error: {0}")]
    Backend(String),

    /// Stored data could not be decoded
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}

impl From<StoreError> for TrustgateError {
    fn from(err: StoreError) -> Self {
        TrustgateError::Storage(err.to_string())
    }
}
