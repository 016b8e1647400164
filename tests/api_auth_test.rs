mod common;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;

use common::{test_app, token_keys};

#[tokio::test]
async fn test_health() {
    let app = test_app();
    let (status, body) = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_register_validation() {
    let app = test_app();
    let cases = [
        (json!({ "email": "a@example.com" }), StatusCode::BAD_REQUEST, "Email and password are required"),
        (json!({ "password": "pw" }), StatusCode::BAD_REQUEST, "Email and password are required"),
        (json!({ "email": "not-an-email", "password": "pw" }), StatusCode::BAD_REQUEST, "Invalid email format"),
        (json!({ "email": "a@example.com", "password": "pw" }), StatusCode::CREATED, "User created successfully"),
        (json!({ "email": "a@example.com", "password": "other" }), StatusCode::BAD_REQUEST, "Email already exists"),
    ];
    for (payload, expected_status, expected_msg) in cases {
        let (status, body) = app.request(Method::POST, "/api/auth/register", None, Some(payload)).await;
        assert_eq!(status, expected_status);
        assert_eq!(body["msg"], expected_msg);
    }
}

#[tokio::test]
async fn test_login_and_me() {
    let app = test_app();
    let token = app.login_as("me@example.com").await;

    let (status, body) = app.get("/api/auth/me", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["logged_in_as"], "me@example.com");
    assert!(body["user_id"].is_i64());

    let (status, body) = app.post("/api/auth/logout", &token, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["msg"].as_str().unwrap().starts_with("Logout successful"));
}

#[tokio::test]
async fn test_bad_credentials() {
    let app = test_app();
    app.login_as("me@example.com").await;

    for payload in [
        json!({ "email": "me@example.com", "password": "wrong" }),
        json!({ "email": "nobody@example.com", "password": "correct horse" }),
        json!({ "email": "me@example.com" }),
    ] {
        let (status, body) = app.request(Method::POST, "/api/auth/login", None, Some(payload)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["msg"], "Bad email or password");
    }
}

#[tokio::test]
async fn test_token_rejections() {
    let app = test_app();

    let (status, _) = app.request(Method::GET, "/api/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.get("/api/auth/me", "garbage").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let expired = token_keys().issue(1, Utc::now() - Duration::hours(3)).unwrap();
    let (status, body) = app.get("/api/auth/me", &expired).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["msg"], "Token has expired");
}

#[tokio::test]
async fn test_me_for_deleted_user_is_not_found() {
    let app = test_app();
    let token = token_keys().issue(9999, Utc::now()).unwrap();
    let (status, body) = app.get("/api/auth/me", &token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["msg"], "User not found");
}
