//! Integration tests for the key-value HTTP API.
//!
//! Exercises the router end to end with Axum's `oneshot()` test infrastructure.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::Duration;
use kvs::{MemStore, Record, RecordStore};
use kvs_server::auth::{TokenIssuer, TokenKind, UserDirectory};
use kvs_server::http::{router, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

struct TestApp {
    app: Router,
    records: MemStore,
    tokens: Arc<TokenIssuer>,
    users: Arc<UserDirectory>,
}

fn setup() -> TestApp {
    let records = MemStore::new();
    records
        .upsert("site_title".to_owned(), "My Site".to_owned())
        .unwrap();

    let tokens = TokenIssuer::new(
        b"integration-secret".to_vec(),
        Duration::minutes(30),
        Duration::days(1),
    );
    let state = AppState::new(
        Arc::new(records.clone()),
        Arc::new(MemStore::new()),
        tokens,
    );
    let tokens = state.tokens.clone();
    let users = state.users.clone();

    TestApp {
        app: router(state),
        records,
        tokens,
        users,
    }
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let resp = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn register_and_login(app: &Router, username: &str) -> (String, String) {
    let (status, _) = send(
        app,
        Method::POST,
        "/api/auth/register",
        None,
        Some(json!({
            "username": username,
            "email": format!("{}@example.com", username),
            "password": "StrongPass123!",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        app,
        Method::POST,
        "/api/auth/token",
        None,
        Some(json!({"username": username, "password": "StrongPass123!"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    (
        body["access"].as_str().unwrap().to_owned(),
        body["refresh"].as_str().unwrap().to_owned(),
    )
}

#[tokio::test]
async fn test_auth_required_for_every_kv_route() {
    let t = setup();

    let (status, body) = send(&t.app, Method::GET, "/api/kv", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Authentication credentials were not provided.");

    let (status, _) = send(&t.app, Method::GET, "/api/kv/site_title", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &t.app,
        Method::PUT,
        "/api/kv/site_title",
        None,
        Some(json!({"value": "Hijacked"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &t.app,
        Method::PUT,
        "/api/kv/new_key",
        Some("not-a-token"),
        Some(json!({"value": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // nothing was written
    assert_eq!(
        t.records.list().unwrap(),
        vec![Record::new("site_title", "My Site")]
    );
}

#[tokio::test]
async fn test_unauthenticated_upsert_with_bad_body_is_still_401() {
    let t = setup();

    let (status, _) = send(&t.app, Method::PUT, "/api/kv/k", None, Some(json!({}))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_list_and_retrieve_with_auth() {
    let t = setup();
    let (access, _) = register_and_login(&t.app, "alice").await;

    let (status, body) = send(&t.app, Method::GET, "/api/kv", Some(&access), None).await;
    assert_eq!(status, StatusCode::OK);
    let keys: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["key"].as_str().unwrap())
        .collect();
    assert!(keys.contains(&"site_title"));

    let (status, body) = send(
        &t.app,
        Method::GET,
        "/api/kv/site_title",
        Some(&access),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"key": "site_title", "value": "My Site"}));
}

#[tokio::test]
async fn test_put_updates_existing() {
    let t = setup();
    let (access, _) = register_and_login(&t.app, "alice").await;

    let (status, body) = send(
        &t.app,
        Method::PUT,
        "/api/kv/site_title",
        Some(&access),
        Some(json!({"value": "New Title"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"key": "site_title", "value": "New Title"}));
    assert_eq!(t.records.get("site_title").unwrap().unwrap().value, "New Title");
}

#[tokio::test]
async fn test_put_creates_then_replaces() {
    let t = setup();
    let (access, _) = register_and_login(&t.app, "alice").await;

    let (status, body) = send(
        &t.app,
        Method::PUT,
        "/api/kv/tagline",
        Some(&access),
        Some(json!({"value": "Just works"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, json!({"key": "tagline", "value": "Just works"}));

    let (status, body) = send(
        &t.app,
        Method::PUT,
        "/api/kv/tagline",
        Some(&access),
        Some(json!({"value": "Updated"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], "Updated");

    // same value again is still a replacement, not a creation
    let (status, _) = send(
        &t.app,
        Method::PUT,
        "/api/kv/tagline",
        Some(&access),
        Some(json!({"value": "Updated"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&t.app, Method::GET, "/api/kv/tagline", Some(&access), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], "Updated");

    let (status, body) = send(&t.app, Method::GET, "/api/kv/missing", Some(&access), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Not found.");
}

#[tokio::test]
async fn test_put_requires_value() {
    let t = setup();
    let (access, _) = register_and_login(&t.app, "alice").await;

    let (status, body) = send(
        &t.app,
        Method::PUT,
        "/api/kv/anything",
        Some(&access),
        Some(json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"value": ["This field is required."]}));
    assert!(t.records.get("anything").unwrap().is_none());

    let (status, _) = send(&t.app, Method::PUT, "/api/kv/anything", Some(&access), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_put_rejects_malformed_json() {
    let t = setup();
    let (access, _) = register_and_login(&t.app, "alice").await;

    let req = Request::builder()
        .method(Method::PUT)
        .uri("/api/kv/k")
        .header(header::AUTHORIZATION, format!("Bearer {}", access))
        .body(Body::from("{\"value\": "))
        .unwrap();
    let resp = t.app.clone().oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(t.records.get("k").unwrap().is_none());
}

#[tokio::test]
async fn test_percent_encoded_keys() {
    let t = setup();
    let (access, _) = register_and_login(&t.app, "alice").await;

    let (status, body) = send(
        &t.app,
        Method::PUT,
        "/api/kv/hello%20world",
        Some(&access),
        Some(json!({"value": "spaced"})),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["key"], "hello world");
    assert!(t.records.get("hello world").unwrap().is_some());
}

#[tokio::test]
async fn test_encoded_slash_is_not_a_key() {
    let t = setup();
    let (access, _) = register_and_login(&t.app, "alice").await;

    let (status, body) = send(
        &t.app,
        Method::PUT,
        "/api/kv/a%2Fb",
        Some(&access),
        Some(json!({"value": "v"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.get("key").is_some());

    let (status, _) = send(&t.app, Method::GET, "/api/kv/a%2Fb", Some(&access), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        t.records.list().unwrap(),
        vec![Record::new("site_title", "My Site")]
    );
}

#[tokio::test]
async fn test_token_obtain_invalid_credentials() {
    let t = setup();
    register_and_login(&t.app, "dana").await;

    let (status, body) = send(
        &t.app,
        Method::POST,
        "/api/auth/token",
        None,
        Some(json!({"username": "dana", "password": "wrongpass"})),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.get("access").is_none());
    assert!(body.get("refresh").is_none());
}

#[tokio::test]
async fn test_token_refresh() {
    let t = setup();
    let (access, refresh) = register_and_login(&t.app, "ed").await;

    let (status, body) = send(
        &t.app,
        Method::POST,
        "/api/auth/token/refresh",
        None,
        Some(json!({ "refresh": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let new_access = body["access"].as_str().unwrap();
    assert!(t.tokens.verify(new_access, TokenKind::Access).is_ok());

    // an access token cannot be used to refresh
    let (status, _) = send(
        &t.app,
        Method::POST,
        "/api/auth/token/refresh",
        None,
        Some(json!({ "refresh": access })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_deactivated_user_cannot_refresh() {
    let t = setup();
    let (access, refresh) = register_and_login(&t.app, "gina").await;

    t.users.set_active("gina", false).unwrap();

    let (status, body) = send(
        &t.app,
        Method::POST,
        "/api/auth/token/refresh",
        None,
        Some(json!({ "refresh": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.get("access").is_none());

    let (status, _) = send(&t.app, Method::GET, "/api/kv", Some(&access), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_token_is_not_an_access_token() {
    let t = setup();
    let (_, refresh) = register_and_login(&t.app, "frank").await;

    let (status, body) = send(&t.app, Method::GET, "/api/kv", Some(&refresh), None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Given token not valid for any token type");
}

#[tokio::test]
async fn test_register_validation() {
    let t = setup();

    let (status, body) = send(
        &t.app,
        Method::POST,
        "/api/auth/register",
        None,
        Some(json!({"email": "nouser@example.com", "password": "StrongPass123!"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.get("username").is_some());

    let (status, body) = send(
        &t.app,
        Method::POST,
        "/api/auth/register",
        None,
        Some(json!({"username": "bob", "email": "bob@example.com", "password": "short"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.get("password").is_some());
}

#[tokio::test]
async fn test_register_response_hides_password() {
    let t = setup();

    let (status, body) = send(
        &t.app,
        Method::POST,
        "/api/auth/register",
        None,
        Some(json!({
            "username": "alice",
            "email": "alice@example.com",
            "password": "StrongPass123!",
            "first_name": "Alice",
            "last_name": "Doe",
        })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["username"], "alice");
    assert_eq!(body["email"], "alice@example.com");
    assert!(body.get("password").is_none());
    assert!(body.get("password_hash").is_none());
}

#[tokio::test]
async fn test_health_needs_no_auth() {
    let t = setup();

    let (status, body) = send(&t.app, Method::GET, "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
