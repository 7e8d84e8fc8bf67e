//! Session API endpoints.
//!
//! - POST `/login` - Exchange username and password for a token pair
//! - POST `/refresh` - Rotate a refresh token
//! - POST `/logout` - Revoke the bearer access token and the given refresh token
//! - GET `/verify` - Check the bearer access token and return its claims
//! - GET `/sessions` - List the caller's active refresh tokens
//! - POST `/revoke-all` - Revoke every session of the caller
//! - POST `/password-reset` - Rate-limited password reset request

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::ApiError;
use crate::auth::{AuthState, Authenticated, BearerToken, ClientAddress};
use crate::jwt::AccessClaims;
use crate::session::TokenPair;

pub fn router(state: AuthState) -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/verify", get(verify))
        .route("/sessions", get(list_sessions))
        .route("/revoke-all", post(revoke_all))
        .route("/password-reset", post(password_reset))
        .with_state(state)
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

#[derive(Deserialize, Default)]
struct LogoutRequest {
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct PasswordResetRequest {
    username: String,
}

#[derive(Serialize)]
struct SessionInfo {
    id: String,
    created_at: u64,
    expires_at: u64,
}

#[derive(Serialize)]
struct ListSessionsResponse {
    sessions: Vec<SessionInfo>,
}

#[derive(Serialize)]
struct RevokeAllResponse {
    revoked: u64,
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ApiError::bad_request(e.body_text()))
}

async fn login(
    State(state): State<AuthState>,
    ClientAddress(origin): ClientAddress,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<TokenPair>, ApiError> {
    let request = json_body(payload)?;
    let pair = state
        .service
        .authenticate(&origin, &request.username, &request.password)
        .await?;
    Ok(Json(pair))
}

async fn refresh(
    State(state): State<AuthState>,
    ClientAddress(origin): ClientAddress,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<TokenPair>, ApiError> {
    let request = json_body(payload)?;
    let pair = state
        .service
        .refresh(&origin, &request.refresh_token)
        .await?;
    Ok(Json(pair))
}

/// Always succeeds for dead or missing tokens so clients can log out blindly.
async fn logout(
    State(state): State<AuthState>,
    BearerToken(access_token): BearerToken,
    payload: Result<Json<LogoutRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let request = match payload {
        Ok(Json(body)) => body,
        // No body at all is fine: only the access token is revoked.
        Err(JsonRejection::MissingJsonContentType(_)) => LogoutRequest::default(),
        Err(e) => return Err(ApiError::bad_request(e.body_text())),
    };

    state
        .service
        .revoke(access_token.as_deref(), request.refresh_token.as_deref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn verify(Authenticated(claims): Authenticated) -> Json<AccessClaims> {
    Json(claims)
}

async fn list_sessions(
    State(state): State<AuthState>,
    Authenticated(claims): Authenticated,
) -> Result<Json<ListSessionsResponse>, ApiError> {
    let records = state.service.list_sessions(&claims.sub).await?;

    let sessions = records
        .into_iter()
        .map(|r| SessionInfo {
            id: r.id,
            created_at: r.created_at,
            expires_at: r.expires_at,
        })
        .collect();
    Ok(Json(ListSessionsResponse { sessions }))
}

async fn revoke_all(
    State(state): State<AuthState>,
    Authenticated(claims): Authenticated,
) -> Result<Json<RevokeAllResponse>, ApiError> {
    let revoked = state.service.revoke_all(&claims.sub).await?;
    // The caller's own access token may predate any stored binding.
    state.service.revocations().add(&claims.jti, claims.exp);
    Ok(Json(RevokeAllResponse { revoked }))
}

/// Only the rate-limit gate lives here; delivery is handled elsewhere.
async fn password_reset(
    State(state): State<AuthState>,
    ClientAddress(origin): ClientAddress,
    payload: Result<Json<PasswordResetRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request = json_body(payload)?;
    state
        .service
        .check_password_reset(&origin, &request.username)?;
    info!(origin = %origin, "Password reset requested");
    Ok(StatusCode::ACCEPTED)
}
