//! HTTP surface.

pub mod error;
pub mod handlers;

use crate::auth::AccountAuthority;
use anyhow::Result;
use axum::{
    body::Body,
    extract::{Extension, MatchedPath},
    http::{HeaderName, HeaderValue, Request},
    routing::{get, post},
    Router,
};
use std::{future::Future, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;

pub use error::ErrorBody;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build the router with every route and the request-id/trace layers.
pub fn router(authority: Arc<AccountAuthority>) -> Router {
    Router::new()
        .route("/auth", post(handlers::auth::auth))
        .route("/register", post(handlers::register::register))
        .route("/verify", post(handlers::verify::verify))
        .route("/check", get(handlers::check::check))
        .route(
            "/password-reset-request",
            post(handlers::password_reset::request),
        )
        .route(
            "/password-reset-verify",
            post(handlers::password_reset::verify),
        )
        .route("/session", get(handlers::session::session))
        .route("/logout", post(handlers::session::logout))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static(REQUEST_ID_HEADER),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    REQUEST_ID_HEADER,
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(authority)),
        )
}

/// Serve `app` on `[::]:port` until `shutdown` resolves.
///
/// # Errors
/// Returns an error if the port cannot be bound or the server fails.
pub async fn serve<F>(port: u16, app: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
