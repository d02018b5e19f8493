//! HS256 signed access tokens.
//!
//! Tokens are compact JWTs: `base64url(header).base64url(claims).base64url(mac)`.
//! The issuer owns the signing key; it is built once at start-up and shared.
//! Role authorization is not part of validation, callers check
//! [`AuthClaims::has_role`] after a token validates.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "HS256";

/// Minimum signing key length in bytes.
pub const MIN_KEY_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid token signature")]
    SignatureInvalid,
    #[error("token expired")]
    Expired,
    #[error("signing key must be at least 32 bytes")]
    KeyTooShort,
    #[error("token expiry out of range")]
    ExpiryOutOfRange,
    #[error("failed to encode token")]
    Encoding(#[from] serde_json::Error),
}

/// Closed set of roles a token can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    /// Logged in but the email address is not verified yet.
    #[serde(rename = "email_verify")]
    PendingVerification,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::PendingVerification => "email_verify",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("a token must carry at least one role")]
pub struct EmptyRoles;

/// Non-empty set of roles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Role>", into = "Vec<Role>")]
pub struct Roles(BTreeSet<Role>);

impl Roles {
    #[must_use]
    pub fn single(role: Role) -> Self {
        Self(BTreeSet::from([role]))
    }

    #[must_use]
    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }
}

impl TryFrom<Vec<Role>> for Roles {
    type Error = EmptyRoles;

    fn try_from(roles: Vec<Role>) -> Result<Self, Self::Error> {
        if roles.is_empty() {
            return Err(EmptyRoles);
        }
        Ok(Self(roles.into_iter().collect()))
    }
}

impl From<Roles> for Vec<Role> {
    fn from(roles: Roles) -> Self {
        roles.0.into_iter().collect()
    }
}

/// Who a token is issued to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
    pub user_id: Uuid,
    pub roles: Roles,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenHeader {
    pub alg: String,
    pub typ: String,
}

impl TokenHeader {
    fn hs256() -> Self {
        Self {
            alg: ALGORITHM.to_string(),
            typ: "JWT".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthClaims {
    pub username: String,
    pub user_id: Uuid,
    pub roles: Roles,
    /// Issued at, Unix seconds.
    pub iat: i64,
    /// Expires at, Unix seconds.
    pub exp: i64,
    pub jti: String,
}

impl AuthClaims {
    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(role)
    }

    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: AuthClaims,
}

impl IssuedToken {
    /// Seconds between issuance and expiry.
    #[must_use]
    pub fn expires_in(&self) -> i64 {
        self.claims.exp - self.claims.iat
    }
}

pub struct TokenIssuer {
    key: SecretString,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer").finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// # Errors
    /// Returns [`TokenError::KeyTooShort`] for keys under [`MIN_KEY_BYTES`].
    pub fn new(key: SecretString) -> Result<Self, TokenError> {
        if key.expose_secret().len() < MIN_KEY_BYTES {
            return Err(TokenError::KeyTooShort);
        }
        Ok(Self { key })
    }

    /// Issue a token for `principal` valid for `ttl` from now.
    ///
    /// # Errors
    /// Returns [`TokenError::Encoding`] if the header or claims cannot be serialized.
    pub fn issue(&self, principal: &Principal, ttl: Duration) -> Result<IssuedToken, TokenError> {
        self.issue_at(principal, ttl, Utc::now())
    }

    /// # Errors
    /// Returns [`TokenError::Encoding`] if the header or claims cannot be serialized,
    /// [`TokenError::ExpiryOutOfRange`] if `now + ttl` does not fit a timestamp.
    pub fn issue_at(
        &self,
        principal: &Principal,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let iat = now.timestamp();
        let claims = AuthClaims {
            username: principal.username.clone(),
            user_id: principal.user_id,
            roles: principal.roles.clone(),
            iat,
            exp: iat
                .checked_add(ttl.num_seconds())
                .ok_or(TokenError::ExpiryOutOfRange)?,
            jti: Uuid::new_v4().to_string(),
        };

        let header_b64 = b64e_json(&TokenHeader::hs256())?;
        let claims_b64 = b64e_json(&claims)?;
        let signing_input = format!("{header_b64}.{claims_b64}");
        let signature = self.mac(&signing_input)?.finalize().into_bytes();
        let signature_b64 = Base64UrlUnpadded::encode_string(&signature);

        Ok(IssuedToken {
            token: format!("{signing_input}.{signature_b64}"),
            claims,
        })
    }

    /// Validate `raw` against the current wall-clock time.
    ///
    /// # Errors
    /// See [`Self::validate_at`].
    pub fn validate(&self, raw: &str) -> Result<AuthClaims, TokenError> {
        self.validate_at(raw, Utc::now().timestamp())
    }

    /// Validate structure, signature and expiry of `raw` at `now_unix_seconds`.
    ///
    /// # Errors
    /// - [`TokenError::Malformed`] unless there are exactly three segments, the
    ///   header names HS256 and the claims decode
    /// - [`TokenError::SignatureInvalid`] on MAC mismatch
    /// - [`TokenError::Expired`] when `now_unix_seconds > exp`
    pub fn validate_at(&self, raw: &str, now_unix_seconds: i64) -> Result<AuthClaims, TokenError> {
        let mut parts = raw.split('.');
        let header_b64 = parts.next().ok_or(TokenError::Malformed)?;
        let claims_b64 = parts.next().ok_or(TokenError::Malformed)?;
        let sig_b64 = parts.next().ok_or(TokenError::Malformed)?;
        if parts.next().is_some() {
            return Err(TokenError::Malformed);
        }

        let header: TokenHeader = b64d_json(header_b64)?;
        if header.alg != ALGORITHM {
            return Err(TokenError::Malformed);
        }

        let signature =
            Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| TokenError::Malformed)?;
        self.mac(&format!("{header_b64}.{claims_b64}"))?
            .verify_slice(&signature)
            .map_err(|_| TokenError::SignatureInvalid)?;

        let claims: AuthClaims = b64d_json(claims_b64)?;
        if now_unix_seconds > claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    fn mac(&self, signing_input: &str) -> Result<HmacSha256, TokenError> {
        let mut mac = HmacSha256::new_from_slice(self.key.expose_secret().as_bytes())
            .map_err(|_| TokenError::KeyTooShort)?;
        mac.update(signing_input.as_bytes());
        Ok(mac)
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(segment).map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}
