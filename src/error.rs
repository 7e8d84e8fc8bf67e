//! Error taxonomy shared by every session operation.
//!
//! Each variant maps to its own HTTP status and stable error code so the
//! HTTP layer never has to inspect message text. Messages never carry a
//! password, secret or raw token.

use std::time::Duration;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("rate limit exceeded, retry after {}s", retry_secs(.retry_after))]
    RateLimitExceeded { retry_after: Duration },

    #[error("account locked, retry after {}s", retry_secs(.retry_after))]
    AccountLocked { retry_after: Duration },

    #[error("token expired")]
    TokenExpired,

    #[error("token revoked")]
    TokenRevoked,

    #[error("refresh token reuse detected")]
    TokenReuseDetected,

    #[error("token malformed")]
    TokenMalformed,

    #[error("token signature invalid")]
    InvalidSignature,

    #[error("token issued in the future")]
    IssuedInFuture,

    #[error("unknown token")]
    UnknownToken,

    #[error("stored credential record is corrupt")]
    CorruptCredentialRecord,

    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("failed to sign token: {0}")]
    Signing(jsonwebtoken::errors::Error),
}

/// Round a retry interval up to whole seconds, never below one.
fn retry_secs(d: &Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials
            | AuthError::TokenExpired
            | AuthError::TokenRevoked
            | AuthError::TokenReuseDetected
            | AuthError::TokenMalformed
            | AuthError::InvalidSignature
            | AuthError::IssuedInFuture
            | AuthError::UnknownToken => StatusCode::UNAUTHORIZED,
            AuthError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::AccountLocked { .. } => StatusCode::LOCKED,
            AuthError::CorruptCredentialRecord
            | AuthError::Storage(_)
            | AuthError::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "AUTH_INVALID_CREDENTIALS",
            AuthError::RateLimitExceeded { .. } => "AUTH_RATE_LIMITED",
            AuthError::AccountLocked { .. } => "AUTH_ACCOUNT_LOCKED",
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::TokenRevoked => "TOKEN_REVOKED",
            AuthError::TokenReuseDetected => "TOKEN_REUSE_DETECTED",
            AuthError::TokenMalformed => "TOKEN_MALFORMED",
            AuthError::InvalidSignature => "TOKEN_INVALID_SIGNATURE",
            AuthError::IssuedInFuture => "TOKEN_ISSUED_IN_FUTURE",
            AuthError::UnknownToken => "TOKEN_UNKNOWN",
            AuthError::CorruptCredentialRecord => "INTERNAL_CREDENTIAL_RECORD",
            AuthError::Storage(_) => "INTERNAL_STORAGE",
            AuthError::Signing(_) => "INTERNAL_SIGNING",
        }
    }

    /// Message safe to show to clients. Internal failures are collapsed.
    pub fn client_message(&self) -> String {
        match self {
            AuthError::CorruptCredentialRecord | AuthError::Storage(_) | AuthError::Signing(_) => {
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AuthError::RateLimitExceeded { retry_after }
            | AuthError::AccountLocked { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// JSON error body shared by every HTTP error: `{"error": {"code", "message"}}`.
pub(crate) fn error_response(status: StatusCode, code: &'static str, message: String) -> Response {
    let body = ErrorBody {
        error: ErrorDetail { code, message },
    };
    (status, Json(body)).into_response()
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let mut response =
            error_response(self.status_code(), self.error_code(), self.client_message());

        if let Some(retry_after) = self.retry_after() {
            response.headers_mut().insert(
                RETRY_AFTER,
                HeaderValue::from(retry_secs(&retry_after)),
            );
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_distinct_per_class() {
        assert_eq!(
            AuthError::InvalidCredentials.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::RateLimitExceeded {
                retry_after: Duration::from_secs(3)
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AuthError::AccountLocked {
                retry_after: Duration::from_secs(3)
            }
            .status_code(),
            StatusCode::LOCKED
        );
        assert_eq!(
            AuthError::CorruptCredentialRecord.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_secs(&Duration::from_millis(1500)), 2);
        assert_eq!(retry_secs(&Duration::from_secs(4)), 4);
        assert_eq!(retry_secs(&Duration::ZERO), 1);
    }

    #[test]
    fn test_internal_errors_are_sanitized() {
        let err = AuthError::Storage(sqlx::Error::RowNotFound);
        assert_eq!(err.client_message(), "An internal error occurred");
        assert_eq!(err.error_code(), "INTERNAL_STORAGE");
    }

    #[test]
    fn test_response_carries_retry_after_header() {
        let response = AuthError::AccountLocked {
            retry_after: Duration::from_secs(300),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::LOCKED);
        assert_eq!(
            response.headers().get(RETRY_AFTER).unwrap().to_str().unwrap(),
            "300"
        );
    }

    #[test]
    fn test_reuse_has_its_own_code() {
        let codes = [
            AuthError::TokenRevoked.error_code(),
            AuthError::TokenReuseDetected.error_code(),
            AuthError::TokenExpired.error_code(),
            AuthError::UnknownToken.error_code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
