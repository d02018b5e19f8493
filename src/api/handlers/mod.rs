pub mod auth;
pub mod check;
pub mod password_reset;
pub mod register;
pub mod session;
pub mod types;
pub mod verify;

use crate::api::error::error_response;
use axum::{http::StatusCode, response::Response, Json};
use serde_json::{json, Value};

const MISSING_PAYLOAD_MESSAGE: &str = "Missing payload";

pub(crate) fn empty_body() -> Json<Value> {
    Json(json!({}))
}

pub(crate) fn missing_payload() -> Response {
    error_response(StatusCode::BAD_REQUEST, MISSING_PAYLOAD_MESSAGE)
}
