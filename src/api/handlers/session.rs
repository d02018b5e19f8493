//! Session introspection and logout for bearer and cookie clients.

use super::{empty_body, types::SessionResponse};
use crate::auth::{
    cookie::{clear_token_cookies, extract_token},
    AccountAuthority, Role,
};
use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

/// `GET /session`: requires a valid token carrying the `user` role.
pub async fn session(headers: HeaderMap, authority: Extension<Arc<AccountAuthority>>) -> Response {
    let token = extract_token(&headers);
    match authority.authorize(token.as_deref(), Role::User) {
        Ok(claims) => (
            StatusCode::OK,
            Json(SessionResponse {
                roles: claims.roles.iter().collect(),
                username: claims.username,
                user_id: claims.user_id,
                expires_at: claims.exp,
            }),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

/// `POST /logout`: tokens are stateless, so this only expires the cookies.
pub async fn logout() -> Response {
    let mut response_headers = HeaderMap::new();
    for cookie in clear_token_cookies() {
        response_headers.append(SET_COOKIE, cookie);
    }
    (StatusCode::OK, response_headers, empty_body()).into_response()
}
