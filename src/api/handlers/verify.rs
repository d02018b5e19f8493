use super::{empty_body, missing_payload, types::VerifyRequest};
use crate::auth::AccountAuthority;
use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

/// `POST /verify`: already-verified accounts also get 200.
pub async fn verify(
    authority: Extension<Arc<AccountAuthority>>,
    payload: Option<Json<VerifyRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match authority
        .verify_email(&request.username, &request.token)
        .await
    {
        Ok(_) => (StatusCode::OK, empty_body()).into_response(),
        Err(err) => err.into_response(),
    }
}
