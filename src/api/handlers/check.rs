use super::{empty_body, types::CheckParams};
use crate::api::error::error_response;
use crate::auth::AccountAuthority;
use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

const UNAVAILABLE_MESSAGE: &str = "Username is not available";

/// `GET /check?username=`: 200 if the name could be registered, 401 otherwise.
pub async fn check(
    authority: Extension<Arc<AccountAuthority>>,
    params: Option<Query<CheckParams>>,
) -> Response {
    let Some(Query(params)) = params else {
        return error_response(StatusCode::UNAUTHORIZED, UNAVAILABLE_MESSAGE);
    };

    match authority.username_available(&params.username).await {
        Ok(true) => (StatusCode::OK, empty_body()).into_response(),
        Ok(false) => error_response(StatusCode::UNAUTHORIZED, UNAVAILABLE_MESSAGE),
        Err(err) => err.into_response(),
    }
}
