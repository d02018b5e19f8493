//! Postgres-backed store. Schema in `sql/schema.sql`.

use super::{
    Account, AccountStore, NewAccount, NewToken, StoreError, TokenRecord, UniqueField,
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

const USERNAME_CONSTRAINT: &str = "accounts_username_key";
const EMAIL_CONSTRAINT: &str = "accounts_email_key";

const ACCOUNT_COLUMNS: &str =
    "id, username, email, password_hash, accepted_terms_at, email_verified_at, created_at";

#[derive(Clone, Copy)]
enum TokenTable {
    Verification,
    Reset,
}

impl TokenTable {
    const fn name(self) -> &'static str {
        match self {
            Self::Verification => "email_verification_codes",
            Self::Reset => "password_reset_tokens",
        }
    }
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_token(
        &self,
        table: TokenTable,
        account_id: Uuid,
        token_hash: &[u8],
    ) -> Result<Option<TokenRecord>, StoreError> {
        let query = format!(
            "SELECT id, account_id, expires_at FROM {} WHERE account_id = $1 AND token_hash = $2",
            table.name()
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let row = sqlx::query(&query)
            .bind(account_id)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup token")?;
        Ok(row.as_ref().map(token_from_row))
    }

    async fn delete_token(&self, table: TokenTable, id: Uuid) -> Result<(), StoreError> {
        let query = format!("DELETE FROM {} WHERE id = $1", table.name());
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = %query
        );
        sqlx::query(&query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete token")?;
        Ok(())
    }

    async fn exists(&self, query: &'static str, value: &str) -> Result<bool, StoreError> {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let exists: bool = sqlx::query_scalar(query)
            .bind(value)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to check uniqueness")?;
        Ok(exists)
    }
}

fn account_from_row(row: &PgRow) -> Account {
    Account {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        accepted_terms_at: row.get("accepted_terms_at"),
        email_verified_at: row.get("email_verified_at"),
        created_at: row.get("created_at"),
    }
}

fn token_from_row(row: &PgRow) -> TokenRecord {
    TokenRecord {
        id: row.get("id"),
        account_id: row.get("account_id"),
        expires_at: row.get("expires_at"),
    }
}

/// Which unique column a failed insert collided on, if any.
fn unique_violation_field(err: &sqlx::Error) -> Option<UniqueField> {
    let sqlx::Error::Database(db_err) = err else {
        return None;
    };
    if !db_err.code().is_some_and(|code| code.as_ref() == "23505") {
        return None;
    }
    match db_err.constraint() {
        Some(USERNAME_CONSTRAINT) => Some(UniqueField::Username),
        Some(EMAIL_CONSTRAINT) => Some(UniqueField::Email),
        _ => None,
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<Account>, StoreError> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE username = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let row = sqlx::query(&query)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup account")?;
        Ok(row.as_ref().map(account_from_row))
    }

    async fn username_exists(&self, username: &str) -> Result<bool, StoreError> {
        self.exists(
            "SELECT EXISTS (SELECT 1 FROM accounts WHERE username = $1)",
            username,
        )
        .await
    }

    async fn email_exists(&self, email: &str) -> Result<bool, StoreError> {
        self.exists("SELECT EXISTS (SELECT 1 FROM accounts WHERE email = $1)", email)
            .await
    }

    async fn create_account(
        &self,
        account: NewAccount,
        verification: NewToken,
    ) -> Result<Account, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin registration transaction")?;

        let query = format!(
            "INSERT INTO accounts (id, username, email, password_hash, accepted_terms_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {ACCOUNT_COLUMNS}"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = %query
        );
        let row = sqlx::query(&query)
            .bind(Uuid::now_v7())
            .bind(&account.username)
            .bind(&account.email)
            .bind(&account.password_hash)
            .bind(account.accepted_terms_at)
            .fetch_one(&mut *tx)
            .instrument(span)
            .await;

        let created = match row {
            Ok(row) => account_from_row(&row),
            Err(err) => {
                // Dropping `tx` rolls the insert back.
                if let Some(field) = unique_violation_field(&err) {
                    return Err(StoreError::Conflict(field));
                }
                return Err(anyhow::Error::new(err)
                    .context("failed to insert account")
                    .into());
            }
        };

        let query = r"
            INSERT INTO email_verification_codes (id, account_id, token_hash, expires_at)
            VALUES ($1, $2, $3, $4)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(created.id)
            .bind(&verification.token_hash)
            .bind(verification.expires_at)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert verification code")?;

        tx.commit()
            .await
            .context("commit registration transaction")?;

        Ok(created)
    }

    async fn find_verification_code(
        &self,
        account_id: Uuid,
        token_hash: &[u8],
    ) -> Result<Option<TokenRecord>, StoreError> {
        self.find_token(TokenTable::Verification, account_id, token_hash)
            .await
    }

    async fn delete_verification_code(&self, id: Uuid) -> Result<(), StoreError> {
        self.delete_token(TokenTable::Verification, id).await
    }

    async fn mark_email_verified(
        &self,
        account_id: Uuid,
        verified_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin verification transaction")?;

        let query = "UPDATE accounts SET email_verified_at = $2 WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(account_id)
            .bind(verified_at)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to mark email verified")?;

        let query = "DELETE FROM email_verification_codes WHERE account_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(account_id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to delete verification codes")?;

        tx.commit()
            .await
            .context("commit verification transaction")?;
        Ok(())
    }

    async fn create_reset_token(
        &self,
        account_id: Uuid,
        token: NewToken,
    ) -> Result<TokenRecord, StoreError> {
        let query = r"
            INSERT INTO password_reset_tokens (id, account_id, token_hash, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, account_id, expires_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(account_id)
            .bind(&token.token_hash)
            .bind(token.expires_at)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert reset token")?;
        Ok(token_from_row(&row))
    }

    async fn find_reset_token(
        &self,
        account_id: Uuid,
        token_hash: &[u8],
    ) -> Result<Option<TokenRecord>, StoreError> {
        self.find_token(TokenTable::Reset, account_id, token_hash)
            .await
    }

    async fn delete_reset_token(&self, id: Uuid) -> Result<(), StoreError> {
        self.delete_token(TokenTable::Reset, id).await
    }

    async fn update_password(
        &self,
        account_id: Uuid,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin password update transaction")?;

        let query = "UPDATE accounts SET password_hash = $2 WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(account_id)
            .bind(password_hash)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to update password")?;

        let query = "DELETE FROM password_reset_tokens WHERE account_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(account_id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to delete reset tokens")?;

        tx.commit()
            .await
            .context("commit password update transaction")?;
        Ok(())
    }
}
