//! Access token issuance and verification.
//!
//! Access tokens are HS256 JWTs carrying a snapshot of the principal's roles.
//! They are never stored; the only server-side state consulted on
//! verification is the revocation registry.

use std::sync::Arc;

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::error::AuthError;
use crate::revocation::RevocationRegistry;

/// Shortest accepted signing secret, in bytes.
pub const MIN_SECRET_BYTES: usize = 32;

/// JWT claims for access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (principal UUID)
    pub sub: String,
    /// Login identifier at issuance
    pub username: String,
    /// Role labels at issuance
    pub roles: Vec<String>,
    /// JWT ID, used to blacklist the token before it expires
    pub jti: String,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Result of issuing an access token.
#[derive(Debug, Clone)]
pub struct IssuedAccessToken {
    /// The signed token string
    pub token: String,
    /// The claims that were signed
    pub claims: AccessClaims,
    /// Token lifetime in seconds
    pub duration: u64,
}

/// Signs and verifies access tokens with one symmetric secret.
pub struct AccessTokens {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    clock: SharedClock,
    revocations: Arc<RevocationRegistry>,
    ttl_secs: u64,
    skew_secs: u64,
}

impl AccessTokens {
    pub fn new(
        secret: &[u8],
        clock: SharedClock,
        revocations: Arc<RevocationRegistry>,
        ttl_secs: u64,
        skew_secs: u64,
    ) -> Self {
        // Time checks are done here against the injected clock, not by the library.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims.clear();
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            clock,
            revocations,
            ttl_secs,
            skew_secs,
        }
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Issue a token with a caller-chosen ID and issue time. The ID is stored
    /// with the refresh token before the token is handed out.
    pub fn issue_at(
        &self,
        jti: String,
        issued_at: u64,
        subject: &str,
        username: &str,
        roles: &[String],
    ) -> Result<IssuedAccessToken, AuthError> {
        let claims = AccessClaims {
            sub: subject.to_string(),
            username: username.to_string(),
            roles: roles.to_vec(),
            jti,
            iat: issued_at,
            exp: issued_at + self.ttl_secs,
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(AuthError::Signing)?;

        Ok(IssuedAccessToken {
            token,
            claims,
            duration: self.ttl_secs,
        })
    }

    /// Verify a token. Checks run in a fixed order: signature, structure,
    /// expiry, issue time, then revocation.
    pub fn verify(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let claims = self.decode(token)?;
        let now = self.clock.now();

        if now >= claims.exp.saturating_add(self.skew_secs) {
            return Err(AuthError::TokenExpired);
        }
        if claims.iat > now.saturating_add(self.skew_secs) {
            return Err(AuthError::IssuedInFuture);
        }
        if self.revocations.is_revoked(&claims.jti) {
            return Err(AuthError::TokenRevoked);
        }

        Ok(claims)
    }

    /// Signature and structure only, no time or revocation checks.
    /// Logout uses this so an expired token can still be blacklisted.
    pub fn decode(&self, token: &str) -> Result<AccessClaims, AuthError> {
        jsonwebtoken::decode::<AccessClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    AuthError::InvalidSignature
                }
                _ => AuthError::TokenMalformed,
            })
    }
}
