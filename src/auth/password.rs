//! Argon2id password hashing with a self-describing encoded format.
//!
//! Hashes are stored as
//! `$argon2id$v=<version>$m=<memory>,t=<iterations>,p=<parallelism>$<salt>$<key>`
//! with unpadded standard base64 for the salt and derived key. Verification
//! re-derives the key with the parameters embedded in the string, so stored
//! hashes stay valid when the defaults are raised.
//!
//! Key derivation is CPU and memory bound. Async callers go through
//! [`PasswordHasher::hash_blocking`] and [`PasswordHasher::verify_blocking`],
//! which run on tokio's blocking pool. A blocking task runs to completion even
//! if the awaiting request is dropped, so a comparison is never cut short.

use argon2::{Algorithm, Argon2, Params, Version};
use base64ct::{Base64Unpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Argon2 version written to and accepted from encoded hashes (0x13).
pub const ARGON2_VERSION: u32 = 0x13;

const ALGORITHM_ID: &str = "argon2id";

pub const MIN_MEMORY_KIB: u32 = 32 * 1024;
pub const MIN_ITERATIONS: u32 = 3;
pub const MIN_PARALLELISM: u32 = 2;
pub const MIN_SALT_LENGTH: u32 = 16;
pub const MIN_KEY_LENGTH: u32 = 32;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("failed to generate random salt")]
    Generation(#[source] rand::Error),
    #[error("the encoded hash is not in the correct format")]
    InvalidFormat,
    #[error("incompatible version of argon2")]
    IncompatibleVersion,
    #[error("invalid hash parameters")]
    InvalidParameters,
    #[error("invalid base64 encoding in hash")]
    InvalidEncoding,
    #[error("hash parameters below the accepted minimum: {0}")]
    WeakParameters(&'static str),
    #[error("key derivation failed: {0}")]
    Derivation(argon2::Error),
    #[error("password hashing worker failed")]
    Worker(#[from] tokio::task::JoinError),
}

/// Argon2id cost parameters. Memory is expressed in KiB.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashParams {
    pub memory: u32,
    pub iterations: u32,
    pub parallelism: u32,
    pub salt_length: u32,
    pub key_length: u32,
}

impl HashParams {
    #[must_use]
    pub const fn new(
        memory: u32,
        iterations: u32,
        parallelism: u32,
        salt_length: u32,
        key_length: u32,
    ) -> Self {
        Self {
            memory,
            iterations,
            parallelism,
            salt_length,
            key_length,
        }
    }

    /// Reject parameters below the production floor.
    ///
    /// # Errors
    /// Returns [`HashError::WeakParameters`] naming the first offending field.
    pub fn enforce_floor(&self) -> Result<(), HashError> {
        if self.memory < MIN_MEMORY_KIB {
            return Err(HashError::WeakParameters("memory"));
        }
        if self.iterations < MIN_ITERATIONS {
            return Err(HashError::WeakParameters("iterations"));
        }
        if self.parallelism < MIN_PARALLELISM {
            return Err(HashError::WeakParameters("parallelism"));
        }
        if self.salt_length < MIN_SALT_LENGTH {
            return Err(HashError::WeakParameters("salt length"));
        }
        if self.key_length < MIN_KEY_LENGTH {
            return Err(HashError::WeakParameters("key length"));
        }
        Ok(())
    }

    fn argon2(&self) -> Result<Argon2<'static>, HashError> {
        let key_length =
            usize::try_from(self.key_length).map_err(|_| HashError::InvalidParameters)?;
        let params = Params::new(
            self.memory,
            self.iterations,
            self.parallelism,
            Some(key_length),
        )
        .map_err(HashError::Derivation)?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for HashParams {
    /// 64 MiB, 3 passes, 2 lanes, 16 byte salt, 32 byte key.
    fn default() -> Self {
        Self::new(64 * 1024, 3, 2, 16, 32)
    }
}

/// Source of salt bytes.
pub trait SaltSource: Send + Sync {
    /// Fill `salt` with cryptographically secure random bytes.
    ///
    /// # Errors
    /// Returns an error when the underlying random source fails.
    fn fill(&self, salt: &mut [u8]) -> Result<(), rand::Error>;
}

/// Operating system CSPRNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsSaltSource;

impl SaltSource for OsSaltSource {
    fn fill(&self, salt: &mut [u8]) -> Result<(), rand::Error> {
        OsRng.try_fill_bytes(salt)
    }
}

/// Parameters, salt and key recovered from an encoded hash.
#[derive(Debug, PartialEq, Eq)]
pub struct DecodedHash {
    pub params: HashParams,
    pub salt: Vec<u8>,
    pub key: Vec<u8>,
}

#[derive(Clone)]
pub struct PasswordHasher {
    params: HashParams,
    salt_source: Arc<dyn SaltSource>,
}

impl std::fmt::Debug for PasswordHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordHasher")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl PasswordHasher {
    #[must_use]
    pub fn new(params: HashParams) -> Self {
        Self::with_salt_source(params, Arc::new(OsSaltSource))
    }

    #[must_use]
    pub fn with_salt_source(params: HashParams, salt_source: Arc<dyn SaltSource>) -> Self {
        Self {
            params,
            salt_source,
        }
    }

    #[must_use]
    pub fn params(&self) -> &HashParams {
        &self.params
    }

    /// Hash a plain-text password with a fresh random salt.
    ///
    /// # Errors
    /// Fails with [`HashError::Generation`] if the salt cannot be generated;
    /// never falls back to an unsalted hash.
    pub fn hash(&self, password: &str) -> Result<String, HashError> {
        let salt_length =
            usize::try_from(self.params.salt_length).map_err(|_| HashError::InvalidParameters)?;
        let mut salt = vec![0u8; salt_length];
        self.salt_source
            .fill(&mut salt)
            .map_err(HashError::Generation)?;

        let key = derive_key(password, &salt, &self.params)?;
        Ok(encode_hash(&self.params, &salt, &key))
    }

    /// [`Self::hash`] on the blocking thread pool.
    ///
    /// # Errors
    /// Same as [`Self::hash`], plus [`HashError::Worker`] if the task panics.
    pub async fn hash_blocking(&self, password: String) -> Result<String, HashError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password)).await?
    }

    /// [`verify_password`] on the blocking thread pool.
    ///
    /// # Errors
    /// Same as [`verify_password`], plus [`HashError::Worker`] if the task panics.
    pub async fn verify_blocking(
        &self,
        password: String,
        encoded_hash: String,
    ) -> Result<bool, HashError> {
        tokio::task::spawn_blocking(move || verify_password(&password, &encoded_hash)).await?
    }
}

/// Compare a plain-text password against an encoded hash.
///
/// The derived keys are compared in constant time.
///
/// # Errors
/// Returns a decode error if `encoded_hash` is malformed or was produced by a
/// different Argon2 version.
pub fn verify_password(password: &str, encoded_hash: &str) -> Result<bool, HashError> {
    let decoded = decode_hash(encoded_hash)?;
    let candidate = derive_key(password, &decoded.salt, &decoded.params)?;
    Ok(candidate.ct_eq(&decoded.key).into())
}

/// Parse an encoded hash into its parameters, salt and key.
///
/// # Errors
/// - [`HashError::InvalidFormat`] unless there are exactly six `$` fields for `argon2id`
/// - [`HashError::IncompatibleVersion`] if the version differs from [`ARGON2_VERSION`]
/// - [`HashError::InvalidParameters`] if the version or cost fields cannot be parsed
/// - [`HashError::InvalidEncoding`] if the salt or key is not unpadded base64
pub fn decode_hash(encoded_hash: &str) -> Result<DecodedHash, HashError> {
    let fields: Vec<&str> = encoded_hash.split('$').collect();
    if fields.len() != 6 || !fields[0].is_empty() || fields[1] != ALGORITHM_ID {
        return Err(HashError::InvalidFormat);
    }

    let version: u32 = fields[2]
        .strip_prefix("v=")
        .and_then(|v| v.parse().ok())
        .ok_or(HashError::InvalidParameters)?;
    if version != ARGON2_VERSION {
        return Err(HashError::IncompatibleVersion);
    }

    let (memory, iterations, parallelism) =
        parse_costs(fields[3]).ok_or(HashError::InvalidParameters)?;

    let salt = Base64Unpadded::decode_vec(fields[4]).map_err(|_| HashError::InvalidEncoding)?;
    let key = Base64Unpadded::decode_vec(fields[5]).map_err(|_| HashError::InvalidEncoding)?;

    let salt_length = u32::try_from(salt.len()).map_err(|_| HashError::InvalidParameters)?;
    let key_length = u32::try_from(key.len()).map_err(|_| HashError::InvalidParameters)?;

    Ok(DecodedHash {
        params: HashParams::new(memory, iterations, parallelism, salt_length, key_length),
        salt,
        key,
    })
}

fn parse_costs(field: &str) -> Option<(u32, u32, u32)> {
    let mut parts = field.split(',');
    let memory = parts.next()?.strip_prefix("m=")?.parse().ok()?;
    let iterations = parts.next()?.strip_prefix("t=")?.parse().ok()?;
    let parallelism = parts.next()?.strip_prefix("p=")?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((memory, iterations, parallelism))
}

fn derive_key(password: &str, salt: &[u8], params: &HashParams) -> Result<Vec<u8>, HashError> {
    let key_length = usize::try_from(params.key_length).map_err(|_| HashError::InvalidParameters)?;
    let mut key = vec![0u8; key_length];
    params
        .argon2()?
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(HashError::Derivation)?;
    Ok(key)
}

fn encode_hash(params: &HashParams, salt: &[u8], key: &[u8]) -> String {
    format!(
        "${ALGORITHM_ID}$v={ARGON2_VERSION}$m={},t={},p={}${}${}",
        params.memory,
        params.iterations,
        params.parallelism,
        Base64Unpadded::encode_string(salt),
        Base64Unpadded::encode_string(key),
    )
}
