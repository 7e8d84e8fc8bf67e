//! Error type for the HTTP adapter.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::error::{AuthError, error_response};

/// API error type with automatic response conversion.
#[derive(Debug)]
pub enum ApiError {
    /// A session operation failed; its own status and code are used.
    Auth(AuthError),
    /// The request body could not be parsed.
    BadRequest(String),
    /// A protected route was called without a bearer token.
    MissingToken,
    /// The client address could not be determined.
    ClientAddress,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        ApiError::Auth(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Auth(e) => e.into_response(),
            ApiError::BadRequest(msg) => error_response(StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::MissingToken => error_response(
                StatusCode::UNAUTHORIZED,
                "TOKEN_MISSING",
                "Missing bearer token".to_string(),
            ),
            ApiError::ClientAddress => error_response(
                StatusCode::BAD_REQUEST,
                "CLIENT_ADDRESS_UNAVAILABLE",
                "Client address unavailable".to_string(),
            ),
        }
    }
}
