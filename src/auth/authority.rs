//! Account state machine: login, registration, email verification and
//! password reset.
//!
//! Verification codes and reset tokens are random 32 byte values encoded as
//! URL-safe base64. The raw value only travels in the notification job; the
//! store keeps its SHA-256 hash.

use super::{
    config::AuthConfig,
    error::AuthError,
    password::{HashError, PasswordHasher},
    profanity::{is_profane, profanity_score},
    token::{AuthClaims, IssuedToken, Principal, Role, Roles, TokenIssuer},
    validation::{is_reserved, normalize_email, normalize_username, valid_email},
};
use crate::notify::{Dispatcher, Job};
use crate::store::{Account, AccountStore, NewAccount, NewToken, StoreError, UniqueField};
use anyhow::Context;
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

const INVALID_EMAIL_MESSAGE: &str = "Invalid email format";
const DISALLOWED_USERNAME_MESSAGE: &str = "Username is not allowed";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    AlreadyVerified,
}

pub struct AccountAuthority {
    store: Arc<dyn AccountStore>,
    hasher: PasswordHasher,
    issuer: Arc<TokenIssuer>,
    dispatcher: Dispatcher,
    config: AuthConfig,
    // Verified against for unknown usernames so both login failures cost the same.
    dummy_hash: String,
}

impl AccountAuthority {
    /// # Errors
    /// Returns an error if the dummy hash cannot be generated.
    pub fn new(
        store: Arc<dyn AccountStore>,
        issuer: Arc<TokenIssuer>,
        dispatcher: Dispatcher,
        config: AuthConfig,
    ) -> Result<Self, HashError> {
        let hasher = PasswordHasher::new(*config.hash_params());
        let mut filler = [0u8; 24];
        OsRng.fill_bytes(&mut filler);
        let dummy_hash = hasher.hash(&Base64UrlUnpadded::encode_string(&filler))?;
        Ok(Self {
            store,
            hasher,
            issuer,
            dispatcher,
            config,
            dummy_hash,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Check `username`/`password` and issue an access token.
    ///
    /// Unknown usernames and wrong passwords fail identically, in message and
    /// in time spent.
    ///
    /// # Errors
    /// [`AuthError::InvalidCredentials`] on any mismatch.
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<IssuedToken, AuthError> {
        let username = normalize_username(username);
        let account = self
            .store
            .find_by_username(&username)
            .await
            .map_err(AuthError::internal)?;

        let encoded_hash = account
            .as_ref()
            .map_or_else(|| self.dummy_hash.clone(), |account| account.password_hash.clone());
        let matched = self
            .hasher
            .verify_blocking(password.to_string(), encoded_hash)
            .await;

        let account = match (account, matched) {
            (Some(account), Ok(true)) => account,
            (_, Ok(_)) => return Err(AuthError::InvalidCredentials),
            (_, Err(err)) => {
                return Err(AuthError::internal(
                    anyhow::Error::new(err).context("failed to verify stored password hash"),
                ))
            }
        };

        let role = if account.is_verified() {
            Role::User
        } else {
            Role::PendingVerification
        };
        let principal = Principal {
            username: account.username,
            user_id: account.id,
            roles: Roles::single(role),
        };
        let issued = self
            .issuer
            .issue(&principal, self.config.token_ttl())
            .map_err(AuthError::internal)?;
        info!(user_id = %principal.user_id, %role, "login succeeded");
        Ok(issued)
    }

    /// Create an unverified account and queue its welcome email.
    ///
    /// # Errors
    /// Validation and uniqueness failures are reported before anything is
    /// persisted. Email collisions use a message that does not confirm the
    /// address is registered.
    #[instrument(skip(self, email, password))]
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Account, AuthError> {
        let username = normalize_username(username);
        let email = normalize_email(email);
        self.validate_new_username(&username)?;
        let validator = self.config.validator();
        if !validator.valid_password(password) {
            return Err(AuthError::Validation(validator.password_message()));
        }
        if !valid_email(&email) {
            return Err(AuthError::Validation(INVALID_EMAIL_MESSAGE.to_string()));
        }

        if self
            .store
            .username_exists(&username)
            .await
            .map_err(AuthError::internal)?
        {
            return Err(AuthError::UsernameTaken(username));
        }
        if self
            .store
            .email_exists(&email)
            .await
            .map_err(AuthError::internal)?
        {
            return Err(AuthError::EmailUnavailable);
        }

        let password_hash = self
            .hasher
            .hash_blocking(password.to_string())
            .await
            .map_err(AuthError::internal)?;
        let code = generate_token().map_err(AuthError::internal)?;
        let now = Utc::now();
        let expires_at = expiry(now, self.config.verification_ttl())?;

        let account = self
            .store
            .create_account(
                NewAccount {
                    username: username.clone(),
                    email: email.clone(),
                    password_hash,
                    accepted_terms_at: now,
                },
                NewToken {
                    token_hash: hash_token(&code),
                    expires_at,
                },
            )
            .await
            .map_err(|err| match err {
                // Lost a race with a concurrent registration.
                StoreError::Conflict(UniqueField::Username) => {
                    AuthError::UsernameTaken(username.clone())
                }
                StoreError::Conflict(UniqueField::Email) => AuthError::EmailUnavailable,
                StoreError::Backend(err) => AuthError::Internal(err),
            })?;

        info!(user_id = %account.id, "account registered");
        self.notify(Job::WelcomeEmail {
            username,
            email,
            verification_code: code,
        });
        Ok(account)
    }

    /// Mark the account's email as verified.
    ///
    /// Succeeds without changes when the account is already verified.
    ///
    /// # Errors
    /// [`AuthError::InvalidToken`] when the account or code is unknown,
    /// [`AuthError::TokenExpired`] when the code is past its expiry (it is deleted).
    #[instrument(skip(self, token))]
    pub async fn verify_email(
        &self,
        username: &str,
        token: &str,
    ) -> Result<VerifyOutcome, AuthError> {
        let account = self
            .store
            .find_by_username(&normalize_username(username))
            .await
            .map_err(AuthError::internal)?
            .ok_or(AuthError::InvalidToken)?;
        if account.is_verified() {
            return Ok(VerifyOutcome::AlreadyVerified);
        }

        let record = self
            .store
            .find_verification_code(account.id, &hash_token(token.trim()))
            .await
            .map_err(AuthError::internal)?
            .ok_or(AuthError::InvalidToken)?;

        let now = Utc::now();
        if record.is_expired_at(now) {
            self.store
                .delete_verification_code(record.id)
                .await
                .map_err(AuthError::internal)?;
            return Err(AuthError::TokenExpired);
        }

        self.store
            .mark_email_verified(account.id, now)
            .await
            .map_err(AuthError::internal)?;
        info!(user_id = %account.id, "email verified");
        Ok(VerifyOutcome::Verified)
    }

    /// Start a password reset if `username` and `email` belong together.
    ///
    /// Callers always report success; a mismatch has no side effects and
    /// internal failures are only logged.
    #[instrument(skip(self, email))]
    pub async fn request_password_reset(&self, username: &str, email: &str) {
        if let Err(err) = self.try_request_password_reset(username, email).await {
            error!(error = ?err, "password reset request failed");
        }
    }

    async fn try_request_password_reset(
        &self,
        username: &str,
        email: &str,
    ) -> Result<(), AuthError> {
        let Some(account) = self
            .store
            .find_by_username(&normalize_username(username))
            .await
            .map_err(AuthError::internal)?
        else {
            return Ok(());
        };
        if account.email != normalize_email(email) {
            return Ok(());
        }

        let code = generate_token().map_err(AuthError::internal)?;
        let expires_at = expiry(Utc::now(), self.config.reset_ttl())?;
        self.store
            .create_reset_token(
                account.id,
                NewToken {
                    token_hash: hash_token(&code),
                    expires_at,
                },
            )
            .await
            .map_err(AuthError::internal)?;

        info!(user_id = %account.id, "password reset requested");
        self.notify(Job::ResetPasswordEmail {
            username: account.username,
            email: account.email,
            reset_code: code,
        });
        Ok(())
    }

    /// Replace the password using a reset token. All of the account's reset
    /// tokens are invalidated on success.
    ///
    /// # Errors
    /// [`AuthError::Validation`] for a bad new password,
    /// [`AuthError::InvalidToken`] for an unknown account or token,
    /// [`AuthError::TokenExpired`] for an expired token (it is deleted).
    #[instrument(skip(self, token, new_password))]
    pub async fn consume_password_reset(
        &self,
        username: &str,
        token: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let validator = self.config.validator();
        if !validator.valid_password(new_password) {
            return Err(AuthError::Validation(validator.password_message()));
        }

        let account = self
            .store
            .find_by_username(&normalize_username(username))
            .await
            .map_err(AuthError::internal)?
            .ok_or(AuthError::InvalidToken)?;
        let record = self
            .store
            .find_reset_token(account.id, &hash_token(token.trim()))
            .await
            .map_err(AuthError::internal)?
            .ok_or(AuthError::InvalidToken)?;

        if record.is_expired_at(Utc::now()) {
            self.store
                .delete_reset_token(record.id)
                .await
                .map_err(AuthError::internal)?;
            return Err(AuthError::TokenExpired);
        }

        let password_hash = self
            .hasher
            .hash_blocking(new_password.to_string())
            .await
            .map_err(AuthError::internal)?;
        self.store
            .update_password(account.id, &password_hash)
            .await
            .map_err(AuthError::internal)?;
        info!(user_id = %account.id, "password reset completed");
        Ok(())
    }

    /// Whether `username` could be registered right now.
    ///
    /// # Errors
    /// Only storage failures.
    pub async fn username_available(&self, username: &str) -> Result<bool, AuthError> {
        let username = normalize_username(username);
        if self.validate_new_username(&username).is_err() {
            return Ok(false);
        }
        let taken = self
            .store
            .username_exists(&username)
            .await
            .map_err(AuthError::internal)?;
        Ok(!taken)
    }

    /// Validate a presented token, then require `role`.
    ///
    /// # Errors
    /// [`AuthError::Unauthenticated`] for a missing, malformed, forged or
    /// expired token, [`AuthError::Forbidden`] when the role is absent.
    pub fn authorize(&self, raw: Option<&str>, role: Role) -> Result<AuthClaims, AuthError> {
        let raw = raw.ok_or(AuthError::Unauthenticated)?;
        let claims = self.issuer.validate(raw).map_err(|err| {
            warn!("rejected access token: {err}");
            AuthError::Unauthenticated
        })?;
        if !claims.has_role(role) {
            return Err(AuthError::Forbidden);
        }
        Ok(claims)
    }

    fn validate_new_username(&self, username: &str) -> Result<(), AuthError> {
        let validator = self.config.validator();
        if !validator.valid_username(username) {
            return Err(AuthError::Validation(validator.username_message()));
        }
        let disallowed = || AuthError::Validation(DISALLOWED_USERNAME_MESSAGE.to_string());
        if is_reserved(username) {
            return Err(disallowed());
        }
        if is_profane(username) {
            debug!(
                profanity_score = profanity_score(username),
                "profane username rejected"
            );
            return Err(disallowed());
        }
        Ok(())
    }

    // The account mutation has already committed; a failed hand-off is logged only.
    fn notify(&self, job: Job) {
        let job_type = job.job_type();
        match self.dispatcher.enqueue(job) {
            Ok(job_id) => info!(%job_id, %job_type, "notification enqueued"),
            Err(err) => error!(%job_type, "failed to enqueue notification: {err}"),
        }
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, AuthError> {
    now.checked_add_signed(ttl)
        .context("token expiry out of range")
        .map_err(AuthError::internal)
}

/// Random single-use token for email links.
fn generate_token() -> anyhow::Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}
