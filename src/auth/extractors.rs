//! Axum extractors for authentication.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use tracing::warn;

use super::ip::extract_client_ip;
use super::state::AuthState;
use crate::api::ApiError;
use crate::jwt::AccessClaims;

/// Read a bearer token from the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// A request carrying a valid, unrevoked access token.
pub struct Authenticated(pub AccessClaims);

impl FromRequestParts<AuthState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AuthState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(ApiError::MissingToken)?;
        let claims = state.service.verify(token)?;
        Ok(Authenticated(claims))
    }
}

/// The bearer token if one was sent, unverified. Used by logout, which must
/// accept expired tokens.
pub struct BearerToken(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for BearerToken {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(BearerToken(bearer_token(&parts.headers).map(str::to_string)))
    }
}

/// The originating client address, used as a rate-limit key.
pub struct ClientAddress(pub String);

impl FromRequestParts<AuthState> for ClientAddress {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AuthState,
    ) -> Result<Self, Self::Rejection> {
        extract_client_ip(parts, &state.ip_source)
            .map(ClientAddress)
            .map_err(|reason| {
                warn!(reason, "Rejecting request without a client address");
                ApiError::ClientAddress
            })
    }
}
