//! Identity store interface and in-memory implementation.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::storage::StoreError;
use trustgate_common::{Account, UserId, VerificationFlags};

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("an account already exists for this address")]
    AlreadyExists,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Persistence for accounts and their verification flags
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Register a new account with no verification flags raised
    async fn create_account(
        &self,
        email: &str,
        display_name: Option<&str>,
        now: i64,
    ) -> Result<Account, AccountError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    async fn load_account(&self, user_id: &UserId) -> Result<Option<Account>, StoreError>;

    /// `None` when the user does not exist
    async fn load_verification(
        &self,
        user_id: &UserId,
    ) -> Result<Option<VerificationFlags>, StoreError>;

    /// Merge `flags` into the stored record (flags are only ever raised)
    /// and return the result. `None` when the user does not exist.
    async fn save_verification(
        &self,
        user_id: &UserId,
        flags: &VerificationFlags,
    ) -> Result<Option<VerificationFlags>, StoreError>;

    /// Backend reachability check
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Generate an opaque user id
pub fn generate_user_id() -> UserId {
    let mut bytes = [0u8; 12];
    rand::rng().fill(&mut bytes);
    UserId::new(format!("usr_{}", URL_SAFE_NO_PAD.encode(bytes)))
}

#[derive(Debug, Default)]
struct Directory {
    accounts: HashMap<UserId, (Account, VerificationFlags)>,
    by_email: HashMap<String, UserId>,
}

/// In-process identity store
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    directory: RwLock<Directory>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn create_account(
        &self,
        email: &str,
        display_name: Option<&str>,
        now: i64,
    ) -> Result<Account, AccountError> {
        let mut directory = self.directory.write().await;
        if directory.by_email.contains_key(email) {
            return Err(AccountError::AlreadyExists);
        }

        let account = Account {
            user_id: generate_user_id(),
            email: email.to_string(),
            display_name: display_name.map(str::to_string),
            created_at: now,
        };
        let flags = VerificationFlags {
            updated_at: now,
            ..Default::default()
        };

        directory
            .by_email
            .insert(email.to_string(), account.user_id.clone());
        directory
            .accounts
            .insert(account.user_id.clone(), (account.clone(), flags));

        Ok(account)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let directory = self.directory.read().await;
        Ok(directory
            .by_email
            .get(email)
            .and_then(|id| directory.accounts.get(id))
            .map(|(account, _)| account.clone()))
    }

    async fn load_account(&self, user_id: &UserId) -> Result<Option<Account>, StoreError> {
        let directory = self.directory.read().await;
        Ok(directory.accounts.get(user_id).map(|(account, _)| account.clone()))
    }

    async fn load_verification(
        &self,
        user_id: &UserId,
    ) -> Result<Option<VerificationFlags>, StoreError> {
        let directory = self.directory.read().await;
        Ok(directory.accounts.get(user_id).map(|(_, flags)| flags.clone()))
    }

    async fn save_verification(
        &self,
        user_id: &UserId,
        flags: &VerificationFlags,
    ) -> Result<Option<VerificationFlags>, StoreError> {
        let mut directory = self.directory.write().await;
        Ok(directory.accounts.get_mut(user_id).map(|(_, stored)| {
            stored.merge(flags);
            stored.clone()
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
