//! Tests for the HTTP contract of the session endpoints.
//!
//! Tests cover:
//! - Status codes and JSON error codes per failure
//! - Retry-After on rate limiting and lockout
//! - Bearer token handling on verify, logout and revoke-all
//! - Client address extraction from a proxy header

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use common::{TestContext, bearer_request, body_json, json_request, test_settings};
use serde_json::json;
use tollgate::auth::IpSource;
use tollgate::settings::AuthSettings;
use tower::ServiceExt;

async fn login(ctx: &TestContext, username: &str, password: &str) -> serde_json::Value {
    let response = ctx
        .app()
        .oneshot(json_request(
            "POST",
            "/auth/login",
            json!({ "username": username, "password": password }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

#[tokio::test]
async fn test_login_returns_token_pair() {
    let ctx = TestContext::new().await;
    ctx.create_user("alice", "correct-pw", &["user"]).await;

    let body = login(&ctx, "alice", "correct-pw").await;
    assert!(body["access_token"].as_str().is_some_and(|t| !t.is_empty()));
    assert!(body["refresh_token"].as_str().is_some_and(|t| !t.is_empty()));
    assert_eq!(body["access_token_ttl"], 900);
    assert_eq!(body["refresh_token_ttl"], 604_800);
}

#[tokio::test]
async fn test_wrong_password_is_401_with_code() {
    let ctx = TestContext::new().await;
    ctx.create_user("alice", "correct-pw", &["user"]).await;

    let response = ctx
        .app()
        .oneshot(json_request(
            "POST",
            "/auth/login",
            json!({ "username": "alice", "password": "nope" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "AUTH_INVALID_CREDENTIALS");
    assert!(!body.to_string().contains("nope"));
}

#[tokio::test]
async fn test_lockout_is_423_with_retry_after() {
    let ctx = TestContext::new().await;
    ctx.create_user("alice", "correct-pw", &["user"]).await;

    for _ in 0..5 {
        let response = ctx
            .app()
            .oneshot(json_request(
                "POST",
                "/auth/login",
                json!({ "username": "alice", "password": "wrong" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = ctx
        .app()
        .oneshot(json_request(
            "POST",
            "/auth/login",
            json!({ "username": "alice", "password": "correct-pw" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::LOCKED);
    assert_eq!(
        response.headers().get(header::RETRY_AFTER).unwrap(),
        "300"
    );
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "AUTH_ACCOUNT_LOCKED");
}

#[tokio::test]
async fn test_rate_limit_is_429_with_retry_after() {
    let settings = AuthSettings {
        login_burst: 1,
        login_period_secs: 60,
        ..test_settings()
    };
    let ctx = TestContext::with_settings(settings).await;
    ctx.create_user("alice", "correct-pw", &["user"]).await;

    login(&ctx, "alice", "correct-pw").await;
    let response = ctx
        .app()
        .oneshot(json_request(
            "POST",
            "/auth/login",
            json!({ "username": "alice", "password": "correct-pw" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response
        .headers()
        .get(header::RETRY_AFTER)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "AUTH_RATE_LIMITED");
}

#[tokio::test]
async fn test_refresh_and_reuse_codes() {
    let ctx = TestContext::new().await;
    ctx.create_user("alice", "correct-pw", &["user"]).await;
    let first = login(&ctx, "alice", "correct-pw").await;
    let first_refresh = first["refresh_token"].as_str().unwrap();

    let response = ctx
        .app()
        .oneshot(json_request(
            "POST",
            "/auth/refresh",
            json!({ "refresh_token": first_refresh }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let second = body_json(response).await;
    assert_ne!(second["refresh_token"], first["refresh_token"]);

    let response = ctx
        .app()
        .oneshot(json_request(
            "POST",
            "/auth/refresh",
            json!({ "refresh_token": first_refresh }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "TOKEN_REUSE_DETECTED");

    let response = ctx
        .app()
        .oneshot(json_request(
            "POST",
            "/auth/refresh",
            json!({ "refresh_token": "never-issued" }),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "TOKEN_UNKNOWN");
}

#[tokio::test]
async fn test_verify_returns_claims() {
    let ctx = TestContext::new().await;
    let uuid = ctx.create_user("alice", "correct-pw", &["user", "admin"]).await;
    let pair = login(&ctx, "alice", "correct-pw").await;

    let response = ctx
        .app()
        .oneshot(bearer_request(
            "GET",
            "/auth/verify",
            pair["access_token"].as_str().unwrap(),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let claims = body_json(response).await;
    assert_eq!(claims["sub"], uuid);
    assert_eq!(claims["username"], "alice");
    assert_eq!(claims["roles"], json!(["user", "admin"]));
}

#[tokio::test]
async fn test_verify_without_or_with_bad_token() {
    let ctx = TestContext::new().await;

    let response = ctx
        .app()
        .oneshot(
            Request::builder()
                .uri("/auth/verify")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"]["code"], "TOKEN_MISSING");

    let response = ctx
        .app()
        .oneshot(bearer_request("GET", "/auth/verify", "not-a-jwt", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"]["code"], "TOKEN_MALFORMED");
}

#[tokio::test]
async fn test_expired_access_token_code() {
    let ctx = TestContext::new().await;
    ctx.create_user("alice", "correct-pw", &["user"]).await;
    let pair = login(&ctx, "alice", "correct-pw").await;

    ctx.clock.advance(900 + 30);
    let response = ctx
        .app()
        .oneshot(bearer_request(
            "GET",
            "/auth/verify",
            pair["access_token"].as_str().unwrap(),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"]["code"], "TOKEN_EXPIRED");
}

#[tokio::test]
async fn test_logout_revokes_both_tokens() {
    let ctx = TestContext::new().await;
    ctx.create_user("alice", "correct-pw", &["user"]).await;
    let pair = login(&ctx, "alice", "correct-pw").await;
    let access = pair["access_token"].as_str().unwrap();
    let refresh = pair["refresh_token"].as_str().unwrap();

    let response = ctx
        .app()
        .oneshot(bearer_request(
            "POST",
            "/auth/logout",
            access,
            Some(json!({ "refresh_token": refresh })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = ctx
        .app()
        .oneshot(bearer_request("GET", "/auth/verify", access, None))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["error"]["code"], "TOKEN_REVOKED");

    let response = ctx
        .app()
        .oneshot(json_request(
            "POST",
            "/auth/refresh",
            json!({ "refresh_token": refresh }),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["error"]["code"], "TOKEN_REVOKED");

    // Logging out again, or with no body, still succeeds.
    let response = ctx
        .app()
        .oneshot(bearer_request("POST", "/auth/logout", access, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_logout_rejects_malformed_body() {
    let ctx = TestContext::new().await;

    let response = ctx
        .app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/logout")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_sessions_and_revoke_all() {
    let ctx = TestContext::new().await;
    ctx.create_user("alice", "correct-pw", &["user"]).await;
    let laptop = login(&ctx, "alice", "correct-pw").await;
    let phone = login(&ctx, "alice", "correct-pw").await;
    let access = phone["access_token"].as_str().unwrap();

    let response = ctx
        .app()
        .oneshot(bearer_request("GET", "/auth/sessions", access, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["sessions"].as_array().unwrap().len(), 2);

    let response = ctx
        .app()
        .oneshot(bearer_request("POST", "/auth/revoke-all", access, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["revoked"], 2);

    for token in [&laptop["access_token"], &phone["access_token"]] {
        let response = ctx
            .app()
            .oneshot(bearer_request(
                "GET",
                "/auth/verify",
                token.as_str().unwrap(),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn test_password_reset_is_rate_limited() {
    let settings = AuthSettings {
        password_reset_burst: 1,
        ..test_settings()
    };
    let ctx = TestContext::with_settings(settings).await;

    let request = || json_request("POST", "/auth/password-reset", json!({ "username": "alice" }));
    let response = ctx.app().oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = ctx.app().oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
}

#[tokio::test]
async fn test_bad_login_body_is_400() {
    let ctx = TestContext::new().await;
    let response = ctx
        .app()
        .oneshot(json_request("POST", "/auth/login", json!({ "username": "alice" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_client_address_from_proxy_header() {
    let settings = AuthSettings {
        password_reset_burst: 1,
        ..test_settings()
    };
    let ctx = TestContext::with_settings(settings).await;
    let source = IpSource::from_header_name("x-forwarded-for").unwrap();

    let request = |ip: &str| {
        Request::builder()
            .method("POST")
            .uri("/auth/password-reset")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", ip)
            .body(Body::from(json!({ "username": format!("user-{ip}") }).to_string()))
            .unwrap()
    };

    // Each forwarded address has its own budget.
    for ip in ["203.0.113.1", "203.0.113.2"] {
        let response = ctx
            .app_with_ip_source(source.clone())
            .oneshot(request(ip))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    // Without the header the request is refused rather than bucketed together.
    let response = ctx
        .app_with_ip_source(source)
        .oneshot(json_request(
            "POST",
            "/auth/password-reset",
            json!({ "username": "someone" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["error"]["code"],
        "CLIENT_ADDRESS_UNAVAILABLE"
    );
}
