//! Password reset: request a token, then consume it.

use super::{
    empty_body, missing_payload,
    types::{PasswordResetRequest, PasswordResetVerifyRequest},
};
use crate::auth::AccountAuthority;
use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

/// `POST /password-reset-request`. The response never reveals whether the
/// username and email matched an account.
pub async fn request(
    authority: Extension<Arc<AccountAuthority>>,
    payload: Option<Json<PasswordResetRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    authority
        .request_password_reset(&request.username, &request.email)
        .await;
    (StatusCode::OK, empty_body()).into_response()
}

/// `POST /password-reset-verify`.
pub async fn verify(
    authority: Extension<Arc<AccountAuthority>>,
    payload: Option<Json<PasswordResetVerifyRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match authority
        .consume_password_reset(&request.username, &request.token, &request.password)
        .await
    {
        Ok(()) => (StatusCode::OK, empty_body()).into_response(),
        Err(err) => err.into_response(),
    }
}
