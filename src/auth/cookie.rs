//! Split-cookie transport for browser clients.
//!
//! A token `h.p.s` travels as two cookies: `header.payload=h.p` which page
//! script may read to show claims, and `signature=s` which is `HttpOnly`.
//! Neither cookie alone is a usable credential.

use axum::http::{
    header::{InvalidHeaderValue, AUTHORIZATION, COOKIE},
    HeaderMap, HeaderValue,
};
use thiserror::Error;

pub const HEADER_PAYLOAD_COOKIE: &str = "header.payload";
pub const SIGNATURE_COOKIE: &str = "signature";
pub const REQUESTED_WITH_HEADER: &str = "x-requested-with";
const XML_HTTP_REQUEST: &str = "XMLHttpRequest";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CookieError {
    #[error("token must have exactly three segments")]
    MalformedToken,
}

/// Split `token` into its `header.payload` part and its signature.
///
/// # Errors
/// Returns [`CookieError::MalformedToken`] unless `token` contains exactly two dots.
pub fn split(token: &str) -> Result<(&str, &str), CookieError> {
    if token.matches('.').count() != 2 {
        return Err(CookieError::MalformedToken);
    }
    token.rsplit_once('.').ok_or(CookieError::MalformedToken)
}

/// Inverse of [`split`]. Performs no validation.
#[must_use]
pub fn join(header_payload: &str, signature: &str) -> String {
    format!("{header_payload}.{signature}")
}

/// How a client wants its token delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientKind {
    Browser,
    Api,
}

impl ClientKind {
    /// Classify a request by `X-Requested-With: XMLHttpRequest`.
    ///
    /// The header is client controlled. This only chooses a transport and
    /// must never gate access.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let is_xhr = headers
            .get(REQUESTED_WITH_HEADER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.trim().eq_ignore_ascii_case(XML_HTTP_REQUEST));
        if is_xhr {
            Self::Browser
        } else {
            Self::Api
        }
    }
}

/// Build the two `Set-Cookie` values for a freshly issued token.
///
/// # Errors
/// Fails if the token is not three segments or contains bytes not allowed in a header.
pub fn token_cookies(
    token: &str,
    ttl_seconds: i64,
) -> Result<[HeaderValue; 2], TokenCookieError> {
    let (header_payload, signature) = split(token)?;
    let header_payload = HeaderValue::from_str(&format!(
        "{HEADER_PAYLOAD_COOKIE}={header_payload}; Path=/; Secure; SameSite=Strict; Max-Age={ttl_seconds}"
    ))?;
    let signature = HeaderValue::from_str(&format!(
        "{SIGNATURE_COOKIE}={signature}; Path=/; Secure; HttpOnly; SameSite=Strict"
    ))?;
    Ok([header_payload, signature])
}

/// `Set-Cookie` values that expire both token cookies.
#[must_use]
pub fn clear_token_cookies() -> [HeaderValue; 2] {
    [
        HeaderValue::from_static(
            "header.payload=; Path=/; Secure; SameSite=Strict; Max-Age=0",
        ),
        HeaderValue::from_static("signature=; Path=/; Secure; HttpOnly; SameSite=Strict; Max-Age=0"),
    ]
}

#[derive(Debug, Error)]
pub enum TokenCookieError {
    #[error(transparent)]
    Token(#[from] CookieError),
    #[error(transparent)]
    Header(#[from] InvalidHeaderValue),
}

/// Token from `Authorization: Bearer`, falling back to the two cookies.
#[must_use]
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    extract_cookie_token(headers)
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn extract_cookie_token(headers: &HeaderMap) -> Option<String> {
    let mut header_payload = None;
    let mut signature = None;
    for value in headers.get_all(COOKIE) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let Some((key, val)) = pair.trim().split_once('=') else {
                continue;
            };
            match key.trim() {
                HEADER_PAYLOAD_COOKIE => header_payload = Some(val.trim()),
                SIGNATURE_COOKIE => signature = Some(val.trim()),
                _ => {}
            }
        }
    }
    match (header_payload, signature) {
        (Some(hp), Some(sig)) if !hp.is_empty() && !sig.is_empty() => Some(join(hp, sig)),
        _ => None,
    }
}
