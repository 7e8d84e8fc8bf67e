#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{Request, Response, header},
};
use tollgate::{
    ServerConfig,
    auth::IpSource,
    clock::ManualClock,
    create_app,
    db::Database,
    session::SessionService,
    settings::AuthSettings,
};

pub const SECRET: &[u8] = b"integration-test-secret-0123456789";
pub const START: u64 = 1_700_000_000;
pub const ORIGIN: &str = "198.51.100.7";

/// Settings with cheap hashing and rate limits out of the way.
pub fn test_settings() -> AuthSettings {
    AuthSettings {
        argon2_memory_kib: 64,
        argon2_iterations: 1,
        argon2_parallelism: 1,
        login_burst: 1000,
        refresh_burst: 1000,
        password_reset_burst: 1000,
        ..AuthSettings::default()
    }
}

pub struct TestContext {
    pub service: Arc<SessionService>,
    pub clock: Arc<ManualClock>,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_settings(test_settings()).await
    }

    pub async fn with_settings(settings: AuthSettings) -> Self {
        let db = Database::open(":memory:")
            .await
            .expect("Failed to open test database");
        let clock = Arc::new(ManualClock::new(START));
        let service = SessionService::from_settings(db, settings, SECRET, clock.clone())
            .expect("Failed to build session service");
        Self {
            service: Arc::new(service),
            clock,
        }
    }

    /// Create a principal and return its UUID.
    pub async fn create_user(&self, username: &str, password: &str, roles: &[&str]) -> String {
        let uuid = uuid::Uuid::new_v4().to_string();
        let hash = self.service.credentials().hash(password).unwrap();
        let roles: Vec<String> = roles.iter().map(|r| r.to_string()).collect();
        self.service
            .database()
            .users()
            .create(&uuid, username, &hash, &roles)
            .await
            .unwrap();
        uuid
    }

    pub fn app(&self) -> Router {
        self.app_with_ip_source(IpSource::ConnectInfo)
    }

    pub fn app_with_ip_source(&self, ip_source: IpSource) -> Router {
        create_app(&ServerConfig {
            service: self.service.clone(),
            ip_source,
        })
    }
}

fn peer() -> ConnectInfo<SocketAddr> {
    ConnectInfo(SocketAddr::from(([198, 51, 100, 7], 40000)))
}

/// A JSON request from the default test peer.
pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .extension(peer())
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// A request with a bearer token and optional JSON body.
pub fn bearer_request(
    method: &str,
    uri: &str,
    token: &str,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .extension(peer());
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
