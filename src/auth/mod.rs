//! Credentials, tokens and the account lifecycle.

pub mod authority;
pub mod config;
pub mod cookie;
pub mod error;
pub mod password;
pub mod profanity;
pub mod token;
pub mod validation;

pub use authority::{AccountAuthority, VerifyOutcome};
pub use config::AuthConfig;
pub use error::{AuthError, ErrorKind};
pub use password::{HashError, HashParams, PasswordHasher};
pub use token::{AuthClaims, IssuedToken, Role, Roles, TokenError, TokenIssuer};
pub use validation::Validator;
