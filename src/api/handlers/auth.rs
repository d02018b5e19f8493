//! `POST /auth`: exchange a username and password for a token.

use super::{
    empty_body,
    types::{AccessTokenResponse, AuthRequest, USERNAME_PASSWORD_CLAIM},
};
use crate::auth::{
    cookie::{token_cookies, ClientKind},
    AccountAuthority, AuthError,
};
use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

/// Browser clients (`X-Requested-With: XMLHttpRequest`) receive the token as
/// two cookies and an empty body; everyone else gets it in the body.
pub async fn auth(
    headers: HeaderMap,
    authority: Extension<Arc<AccountAuthority>>,
    payload: Option<Json<AuthRequest>>,
) -> Response {
    let request = match payload {
        Some(Json(request)) if request.claim == USERNAME_PASSWORD_CLAIM => request,
        _ => return AuthError::UnsupportedClaim.into_response(),
    };

    let issued = match authority.login(&request.username, &request.password).await {
        Ok(issued) => issued,
        Err(err) => return err.into_response(),
    };

    match ClientKind::from_headers(&headers) {
        ClientKind::Api => (
            StatusCode::OK,
            Json(AccessTokenResponse {
                expires_in: issued.expires_in(),
                access_token: issued.token,
            }),
        )
            .into_response(),
        ClientKind::Browser => match token_cookies(&issued.token, issued.expires_in()) {
            Ok(cookies) => {
                let mut response_headers = HeaderMap::new();
                for cookie in cookies {
                    response_headers.append(SET_COOKIE, cookie);
                }
                (StatusCode::OK, response_headers, empty_body()).into_response()
            }
            Err(err) => AuthError::internal(err).into_response(),
        },
    }
}
