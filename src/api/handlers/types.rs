use crate::auth::Role;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The only claim `POST /auth` accepts.
pub const USERNAME_PASSWORD_CLAIM: &str = "username+password";

// No Debug: carries a credential.
#[derive(Deserialize)]
pub struct AuthRequest {
    pub claim: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
    pub expires_in: i64,
}

// No Debug: carries a credential.
#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

// No Debug: carries a credential.
#[derive(Deserialize)]
pub struct VerifyRequest {
    pub username: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckParams {
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    pub username: String,
    pub email: String,
}

// No Debug: carries a credential.
#[derive(Deserialize)]
pub struct PasswordResetVerifyRequest {
    pub username: String,
    pub token: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub username: String,
    pub user_id: Uuid,
    pub roles: Vec<Role>,
    /// Unix seconds.
    pub expires_at: i64,
}
