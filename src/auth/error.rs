//! Outcome taxonomy for account operations.
//!
//! Every variant renders one of a small set of fixed messages. Lookups that
//! miss are folded into the same messages as bad input so responses never
//! reveal whether an account, email or token exists.

use thiserror::Error;

pub const INTERNAL_ERROR_MESSAGE: &str = "Authentication server error";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; maps to 400.
    Validation,
    /// Bad credentials or token; maps to 401.
    Authentication,
    /// Valid token without the required role; maps to 403.
    Forbidden,
    /// Maps to 500.
    Internal,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("Username '{0}' already in use")]
    UsernameTaken(String),
    #[error("The provided email cannot be used")]
    EmailUnavailable,
    #[error("Invalid authentication claim")]
    UnsupportedClaim,
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Invalid username or token")]
    InvalidToken,
    #[error("Token has expired")]
    TokenExpired,
    #[error("Authentication required")]
    Unauthenticated,
    #[error("Insufficient permissions")]
    Forbidden,
    #[error("Authentication server error")]
    Internal(#[source] anyhow::Error),
}

impl AuthError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_)
            | Self::UsernameTaken(_)
            | Self::EmailUnavailable
            | Self::UnsupportedClaim
            | Self::InvalidToken
            | Self::TokenExpired => ErrorKind::Validation,
            Self::InvalidCredentials | Self::Unauthenticated => ErrorKind::Authentication,
            Self::Forbidden => ErrorKind::Forbidden,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn internal(err: impl Into<anyhow::Error>) -> Self {
        Self::Internal(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_hide_details() {
        let err = AuthError::internal(anyhow::anyhow!("connection refused to 10.0.0.3:5432"));
        assert_eq!(err.to_string(), "Authentication server error");
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn username_taken_names_the_username() {
        let err = AuthError::UsernameTaken("newplayer".to_string());
        assert_eq!(err.to_string(), "Username 'newplayer' already in use");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn email_collision_does_not_echo_email() {
        assert!(!AuthError::EmailUnavailable.to_string().contains('@'));
    }

    #[test]
    fn kinds() {
        assert_eq!(AuthError::InvalidCredentials.kind(), ErrorKind::Authentication);
        assert_eq!(AuthError::Unauthenticated.kind(), ErrorKind::Authentication);
        assert_eq!(AuthError::Forbidden.kind(), ErrorKind::Forbidden);
        assert_eq!(AuthError::TokenExpired.kind(), ErrorKind::Validation);
    }
}
