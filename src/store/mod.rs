//! Account persistence.
//!
//! Uniqueness of usernames and emails is enforced by the store itself, so two
//! registrations racing on the same name resolve to one [`StoreError::Conflict`].
//! Verification codes and reset tokens are stored as SHA-256 hashes only.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniqueField {
    Username,
    Email,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0:?} already exists")]
    Conflict(UniqueField),
    #[error("storage backend error")]
    Backend(#[from] anyhow::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub accepted_terms_at: DateTime<Utc>,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.email_verified_at.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub accepted_terms_at: DateTime<Utc>,
}

/// A hashed single-use token to persist.
#[derive(Clone, Debug)]
pub struct NewToken {
    pub token_hash: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

/// An email verification code or password reset token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl TokenRecord {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<Account>, StoreError>;

    async fn username_exists(&self, username: &str) -> Result<bool, StoreError>;

    async fn email_exists(&self, email: &str) -> Result<bool, StoreError>;

    /// Insert the account and its first verification code atomically.
    async fn create_account(
        &self,
        account: NewAccount,
        verification: NewToken,
    ) -> Result<Account, StoreError>;

    async fn find_verification_code(
        &self,
        account_id: Uuid,
        token_hash: &[u8],
    ) -> Result<Option<TokenRecord>, StoreError>;

    async fn delete_verification_code(&self, id: Uuid) -> Result<(), StoreError>;

    /// Stamp `email_verified_at` and drop every outstanding verification code.
    async fn mark_email_verified(
        &self,
        account_id: Uuid,
        verified_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn create_reset_token(
        &self,
        account_id: Uuid,
        token: NewToken,
    ) -> Result<TokenRecord, StoreError>;

    async fn find_reset_token(
        &self,
        account_id: Uuid,
        token_hash: &[u8],
    ) -> Result<Option<TokenRecord>, StoreError>;

    async fn delete_reset_token(&self, id: Uuid) -> Result<(), StoreError>;

    /// Replace the password hash and drop every outstanding reset token.
    async fn update_password(&self, account_id: Uuid, password_hash: &str)
        -> Result<(), StoreError>;
}
