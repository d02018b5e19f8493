//! In-process store for development and tests.

use super::{
    Account, AccountStore, NewAccount, NewToken, StoreError, TokenRecord, UniqueField,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct StoredToken {
    record: TokenRecord,
    token_hash: Vec<u8>,
}

#[derive(Default)]
struct Tables {
    accounts: HashMap<Uuid, Account>,
    verification_codes: HashMap<Uuid, StoredToken>,
    reset_tokens: HashMap<Uuid, StoredToken>,
}

impl Tables {
    fn find_token(
        tokens: &HashMap<Uuid, StoredToken>,
        account_id: Uuid,
        token_hash: &[u8],
    ) -> Option<TokenRecord> {
        tokens
            .values()
            .find(|stored| stored.record.account_id == account_id && stored.token_hash == token_hash)
            .map(|stored| stored.record.clone())
    }

    fn insert_token(
        tokens: &mut HashMap<Uuid, StoredToken>,
        account_id: Uuid,
        token: NewToken,
    ) -> TokenRecord {
        let record = TokenRecord {
            id: Uuid::now_v7(),
            account_id,
            expires_at: token.expires_at,
        };
        tokens.insert(
            record.id,
            StoredToken {
                record: record.clone(),
                token_hash: token.token_hash,
            },
        );
        record
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Outstanding verification codes for an account.
    pub async fn verification_code_count(&self, account_id: Uuid) -> usize {
        let tables = self.tables.lock().await;
        tables
            .verification_codes
            .values()
            .filter(|stored| stored.record.account_id == account_id)
            .count()
    }

    /// Outstanding reset tokens for an account.
    pub async fn reset_token_count(&self, account_id: Uuid) -> usize {
        let tables = self.tables.lock().await;
        tables
            .reset_tokens
            .values()
            .filter(|stored| stored.record.account_id == account_id)
            .count()
    }

    /// Move a token's expiry, for exercising expiry paths.
    pub async fn set_token_expiry(&self, id: Uuid, expires_at: DateTime<Utc>) -> bool {
        let mut tables = self.tables.lock().await;
        let tables = &mut *tables;
        for tokens in [&mut tables.verification_codes, &mut tables.reset_tokens] {
            if let Some(stored) = tokens.get_mut(&id) {
                stored.record.expires_at = expires_at;
                return true;
            }
        }
        false
    }

    pub async fn account_count(&self) -> usize {
        self.tables.lock().await.accounts.len()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<Account>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .accounts
            .values()
            .find(|account| account.username == username)
            .cloned())
    }

    async fn username_exists(&self, username: &str) -> Result<bool, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .accounts
            .values()
            .any(|account| account.username == username))
    }

    async fn email_exists(&self, email: &str) -> Result<bool, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.accounts.values().any(|account| account.email == email))
    }

    async fn create_account(
        &self,
        account: NewAccount,
        verification: NewToken,
    ) -> Result<Account, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables
            .accounts
            .values()
            .any(|existing| existing.username == account.username)
        {
            return Err(StoreError::Conflict(UniqueField::Username));
        }
        if tables
            .accounts
            .values()
            .any(|existing| existing.email == account.email)
        {
            return Err(StoreError::Conflict(UniqueField::Email));
        }

        let created = Account {
            id: Uuid::now_v7(),
            username: account.username,
            email: account.email,
            password_hash: account.password_hash,
            accepted_terms_at: account.accepted_terms_at,
            email_verified_at: None,
            created_at: Utc::now(),
        };
        tables.accounts.insert(created.id, created.clone());
        Tables::insert_token(&mut tables.verification_codes, created.id, verification);
        Ok(created)
    }

    async fn find_verification_code(
        &self,
        account_id: Uuid,
        token_hash: &[u8],
    ) -> Result<Option<TokenRecord>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(Tables::find_token(
            &tables.verification_codes,
            account_id,
            token_hash,
        ))
    }

    async fn delete_verification_code(&self, id: Uuid) -> Result<(), StoreError> {
        self.tables.lock().await.verification_codes.remove(&id);
        Ok(())
    }

    async fn mark_email_verified(
        &self,
        account_id: Uuid,
        verified_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if let Some(account) = tables.accounts.get_mut(&account_id) {
            account.email_verified_at = Some(verified_at);
        }
        tables
            .verification_codes
            .retain(|_, stored| stored.record.account_id != account_id);
        Ok(())
    }

    async fn create_reset_token(
        &self,
        account_id: Uuid,
        token: NewToken,
    ) -> Result<TokenRecord, StoreError> {
        let mut tables = self.tables.lock().await;
        Ok(Tables::insert_token(
            &mut tables.reset_tokens,
            account_id,
            token,
        ))
    }

    async fn find_reset_token(
        &self,
        account_id: Uuid,
        token_hash: &[u8],
    ) -> Result<Option<TokenRecord>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(Tables::find_token(&tables.reset_tokens, account_id, token_hash))
    }

    async fn delete_reset_token(&self, id: Uuid) -> Result<(), StoreError> {
        self.tables.lock().await.reset_tokens.remove(&id);
        Ok(())
    }

    async fn update_password(
        &self,
        account_id: Uuid,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if let Some(account) = tables.accounts.get_mut(&account_id) {
            account.password_hash = password_hash.to_string();
        }
        tables
            .reset_tokens
            .retain(|_, stored| stored.record.account_id != account_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use chrono::Duration;

    fn new_account(username: &str, email: &str) -> NewAccount {
        NewAccount {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: "$argon2id$v=19$m=1024,t=1,p=1$c2FsdA$aGFzaA".to_string(),
            accepted_terms_at: Utc::now(),
        }
    }

    fn token(hash: &[u8]) -> NewToken {
        NewToken {
            token_hash: hash.to_vec(),
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn create_account_enforces_uniqueness() -> Result<()> {
        let store = MemoryStore::new();
        store
            .create_account(new_account("newplayer", "a@example.com"), token(b"one"))
            .await?;

        let err = store
            .create_account(new_account("newplayer", "b@example.com"), token(b"two"))
            .await;
        assert!(matches!(
            err,
            Err(StoreError::Conflict(UniqueField::Username))
        ));

        let err = store
            .create_account(new_account("otherplayer", "a@example.com"), token(b"three"))
            .await;
        assert!(matches!(err, Err(StoreError::Conflict(UniqueField::Email))));

        assert_eq!(store.account_count().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn verification_code_bound_to_account() -> Result<()> {
        let store = MemoryStore::new();
        let first = store
            .create_account(new_account("firstuser", "a@example.com"), token(b"first"))
            .await?;
        let second = store
            .create_account(new_account("seconduser", "b@example.com"), token(b"second"))
            .await?;

        assert!(store
            .find_verification_code(first.id, b"first")
            .await?
            .is_some());
        assert!(store
            .find_verification_code(second.id, b"first")
            .await?
            .is_none());
        Ok(())
    }

    #[tokio::test]
    async fn mark_verified_drops_all_codes() -> Result<()> {
        let store = MemoryStore::new();
        let account = store
            .create_account(new_account("newplayer", "a@example.com"), token(b"code"))
            .await?;
        store.mark_email_verified(account.id, Utc::now()).await?;

        assert_eq!(store.verification_code_count(account.id).await, 0);
        let account = store.find_by_username("newplayer").await?;
        assert!(account.is_some_and(|account| account.is_verified()));
        Ok(())
    }

    #[tokio::test]
    async fn update_password_drops_reset_tokens() -> Result<()> {
        let store = MemoryStore::new();
        let account = store
            .create_account(new_account("newplayer", "a@example.com"), token(b"code"))
            .await?;
        store.create_reset_token(account.id, token(b"r1")).await?;
        store.create_reset_token(account.id, token(b"r2")).await?;
        assert_eq!(store.reset_token_count(account.id).await, 2);

        store.update_password(account.id, "new-hash").await?;
        assert_eq!(store.reset_token_count(account.id).await, 0);
        let account = store.find_by_username("newplayer").await?;
        assert_eq!(
            account.map(|account| account.password_hash).as_deref(),
            Some("new-hash")
        );
        Ok(())
    }

    #[tokio::test]
    async fn token_expiry_can_be_moved() -> Result<()> {
        let store = MemoryStore::new();
        let account = store
            .create_account(new_account("newplayer", "a@example.com"), token(b"code"))
            .await?;
        let reset = store.create_reset_token(account.id, token(b"reset")).await?;
        let past = Utc::now() - Duration::minutes(1);
        assert!(store.set_token_expiry(reset.id, past).await);

        let found = store.find_reset_token(account.id, b"reset").await?;
        assert!(found.is_some_and(|record| record.is_expired_at(Utc::now())));
        assert!(!store.set_token_expiry(Uuid::now_v7(), past).await);
        Ok(())
    }
}
