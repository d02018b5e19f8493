use super::{empty_body, missing_payload, types::RegisterRequest};
use crate::auth::AccountAuthority;
use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

/// `POST /register`: 201 with `{}` once the account exists.
pub async fn register(
    authority: Extension<Arc<AccountAuthority>>,
    payload: Option<Json<RegisterRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match authority
        .register(&request.username, &request.email, &request.password)
        .await
    {
        Ok(_) => (StatusCode::CREATED, empty_body()).into_response(),
        Err(err) => err.into_response(),
    }
}
