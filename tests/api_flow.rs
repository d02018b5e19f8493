//! HTTP contract tests against the in-process router.

#![allow(clippy::unwrap_used)]

use anyhow::Result;
use axum::{
    body::{to_bytes, Body},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE},
        HeaderValue, Method, Request, StatusCode,
    },
    response::Response,
    Router,
};
use base64ct::{Base64UrlUnpadded, Encoding};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tower::ServiceExt;
use warden::{
    api,
    auth::{AccountAuthority, AuthConfig, HashParams, TokenIssuer},
    notify::{spawn_dispatcher, DispatcherConfig, Job, JobQueue, MemoryJobQueue},
    store::{AccountStore, MemoryStore},
};

const PASSWORD: &str = "supersecretpassw0rd";
const BODY_LIMIT: usize = 64 * 1024;

struct TestApp {
    router: Router,
    queue: Arc<MemoryJobQueue>,
}

impl TestApp {
    fn new() -> Self {
        let queue = Arc::new(MemoryJobQueue::default());
        let (dispatcher, _failures, _worker) = spawn_dispatcher(
            Arc::clone(&queue) as Arc<dyn JobQueue>,
            DispatcherConfig::new(),
        );
        let issuer =
            TokenIssuer::new(SecretString::from("integration-test-signing-key-0123456789".to_string()))
                .unwrap();
        let config = AuthConfig::new().with_hash_params(HashParams::new(1024, 1, 1, 16, 32));
        let authority = AccountAuthority::new(
            Arc::new(MemoryStore::new()) as Arc<dyn AccountStore>,
            Arc::new(issuer),
            dispatcher,
            config,
        )
        .unwrap();
        Self {
            router: api::router(Arc::new(authority)),
            queue,
        }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn post(&self, uri: &str, body: Value) -> Response {
        self.send(json_request(Method::POST, uri, &body)).await
    }

    async fn next_job(&self) -> Job {
        let reserved = self
            .queue
            .reserve_timeout(Duration::from_secs(2))
            .await
            .unwrap();
        self.queue.delete(reserved.id).await;
        reserved.job
    }

    async fn register_newplayer(&self) -> String {
        let response = self
            .post(
                "/register",
                json!({"username": "newplayer", "email": "newplayer@example.com", "password": PASSWORD}),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let Job::WelcomeEmail {
            verification_code, ..
        } = self.next_job().await
        else {
            panic!("expected a welcome email job");
        };
        verification_code
    }

    async fn login_api(&self, password: &str) -> Response {
        self.post(
            "/auth",
            json!({"claim": "username+password", "username": "newplayer", "password": password}),
        )
        .await
    }

    async fn access_token(&self) -> String {
        let response = self.login_api(PASSWORD).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        body["access_token"].as_str().unwrap().to_string()
    }

    async fn session(&self, token: &str) -> Response {
        self.send(
            Request::builder()
                .uri("/session")
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}

fn json_request(method: Method, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), BODY_LIMIT)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn token_roles(token: &str) -> Vec<String> {
    let payload = token.split('.').nth(1).unwrap();
    let claims: Value =
        serde_json::from_slice(&Base64UrlUnpadded::decode_vec(payload).unwrap()).unwrap();
    claims["roles"]
        .as_array()
        .unwrap()
        .iter()
        .map(|role| role.as_str().unwrap().to_string())
        .collect()
}

fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .map(|value| value.to_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn newplayer_registration_and_verification() -> Result<()> {
    let app = TestApp::new();
    let code = app.register_newplayer().await;

    let response = app
        .post(
            "/register",
            json!({"username": "newplayer", "email": "other@example.com", "password": PASSWORD}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], 400);
    assert_eq!(body["message"], "Username 'newplayer' already in use");

    let pending = app.access_token().await;
    assert_eq!(token_roles(&pending), vec!["email_verify"]);
    assert_eq!(app.session(&pending).await.status(), StatusCode::FORBIDDEN);

    let response = app
        .post("/verify", json!({"username": "newplayer", "token": code}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({}));

    // Verifying again is not an error.
    let response = app
        .post("/verify", json!({"username": "newplayer", "token": code}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let verified = app.access_token().await;
    assert_eq!(token_roles(&verified), vec!["user"]);

    let response = app.session(&verified).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["username"], "newplayer");
    assert_eq!(body["roles"], json!(["user"]));
    Ok(())
}

#[tokio::test]
async fn email_collision_message_is_generic() {
    let app = TestApp::new();
    app.register_newplayer().await;

    let response = app
        .post(
            "/register",
            json!({"username": "otherplayer", "email": "newplayer@example.com", "password": PASSWORD}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(!body["message"]
        .as_str()
        .unwrap()
        .contains("newplayer@example.com"));
}

#[tokio::test]
async fn verify_with_bad_token_is_rejected() {
    let app = TestApp::new();
    app.register_newplayer().await;

    let response = app
        .post("/verify", json!({"username": "newplayer", "token": "not-the-code"}))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post("/verify", json!({"username": "nobody_here", "token": "not-the-code"}))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn login_failures_are_indistinguishable() {
    let app = TestApp::new();
    app.register_newplayer().await;

    let wrong_password = app.login_api("wrong-password-123").await;
    let unknown_user = app
        .post(
            "/auth",
            json!({"claim": "username+password", "username": "nobody_here", "password": PASSWORD}),
        )
        .await;

    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_user.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_bytes(wrong_password).await,
        body_bytes(unknown_user).await
    );
}

#[tokio::test]
async fn unsupported_claim_and_missing_body() {
    let app = TestApp::new();

    let response = app
        .post(
            "/auth",
            json!({"claim": "oauth", "username": "newplayer", "password": PASSWORD}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["message"],
        "Invalid authentication claim"
    );

    let response = app
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/auth")
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from("not json"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/register")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn browser_login_uses_split_cookies() {
    let app = TestApp::new();
    let code = app.register_newplayer().await;
    app.post("/verify", json!({"username": "newplayer", "token": code}))
        .await;

    let mut request = json_request(
        Method::POST,
        "/auth",
        &json!({"claim": "username+password", "username": "newplayer", "password": PASSWORD}),
    );
    request
        .headers_mut()
        .insert("x-requested-with", HeaderValue::from_static("XMLHttpRequest"));
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 2);
    let header_payload = cookies
        .iter()
        .find(|c| c.starts_with("header.payload="))
        .unwrap();
    let signature = cookies.iter().find(|c| c.starts_with("signature=")).unwrap();
    assert!(header_payload.contains("Secure"));
    assert!(!header_payload.contains("HttpOnly"));
    assert!(header_payload.contains("Max-Age=3600"));
    assert!(signature.contains("Secure"));
    assert!(signature.contains("HttpOnly"));
    assert_eq!(body_json(response).await, json!({}));

    // Send the two cookies back the way a browser would.
    let pair = |cookie: &String| cookie.split(';').next().unwrap().to_string();
    let cookie_header = format!("{}; {}", pair(header_payload), pair(signature));
    let response = app
        .send(
            Request::builder()
                .uri("/session")
                .header(COOKIE, cookie_header)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // The readable half alone is not a credential.
    let response = app
        .send(
            Request::builder()
                .uri("/session")
                .header(COOKIE, pair(header_payload))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_expires_both_cookies() {
    let app = TestApp::new();
    let response = app.post("/logout", json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 2);
    assert!(cookies.iter().all(|c| c.contains("Max-Age=0")));
}

#[tokio::test]
async fn session_requires_a_valid_token() {
    let app = TestApp::new();
    let response = app
        .send(Request::builder().uri("/session").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.session("a.b.c").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], 401);
}

#[tokio::test]
async fn check_reports_availability() {
    let app = TestApp::new();
    let check = |name: &str| {
        Request::builder()
            .uri(format!("/check?username={name}"))
            .body(Body::empty())
            .unwrap()
    };

    assert_eq!(app.send(check("newplayer")).await.status(), StatusCode::OK);
    app.register_newplayer().await;
    assert_eq!(
        app.send(check("newplayer")).await.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(app.send(check("abc")).await.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        app.send(Request::builder().uri("/check").body(Body::empty()).unwrap())
            .await
            .status(),
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn reset_request_response_does_not_leak_accounts() {
    let app = TestApp::new();
    app.register_newplayer().await;

    let unknown = app
        .post(
            "/password-reset-request",
            json!({"username": "nobody_here", "email": "nobody@example.com"}),
        )
        .await;
    let known = app
        .post(
            "/password-reset-request",
            json!({"username": "newplayer", "email": "newplayer@example.com"}),
        )
        .await;

    assert_eq!(unknown.status(), StatusCode::OK);
    assert_eq!(known.status(), StatusCode::OK);
    assert_eq!(body_bytes(unknown).await, body_bytes(known).await);
}

#[tokio::test]
async fn password_reset_round_trip() {
    let app = TestApp::new();
    app.register_newplayer().await;

    let response = app
        .post(
            "/password-reset-request",
            json!({"username": "newplayer", "email": "newplayer@example.com"}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let Job::ResetPasswordEmail { reset_code, .. } = app.next_job().await else {
        panic!("expected a reset email job");
    };

    let response = app
        .post(
            "/password-reset-verify",
            json!({"username": "newplayer", "token": reset_code, "password": "short"}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post(
            "/password-reset-verify",
            json!({"username": "newplayer", "token": reset_code, "password": "a-brand-new-passw0rd"}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(
        app.login_api(PASSWORD).await.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        app.login_api("a-brand-new-passw0rd").await.status(),
        StatusCode::OK
    );

    let response = app
        .post(
            "/password-reset-verify",
            json!({"username": "newplayer", "token": reset_code, "password": "yet-another-passw0rd"}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn request_id_is_set_and_propagated() {
    let app = TestApp::new();
    let response = app.post("/logout", json!({})).await;
    assert!(response.headers().contains_key("x-request-id"));

    let response = app
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/logout")
                .header("x-request-id", "req-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "req-123"
    );
}
