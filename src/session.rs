//! Session orchestration.
//!
//! [`SessionService`] is the single entry point the HTTP layer talks to. It
//! gates each request through the rate limiter and lockout controller, then
//! drives the credential verifier, token issuer and refresh token store.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::clock::SharedClock;
use crate::db::{
    BoundAccessToken, Database, IssuedRefreshToken, Principal, RefreshRecord, Rotation,
    TokenStore,
};
use crate::error::AuthError;
use crate::jwt::{AccessClaims, AccessTokens, IssuedAccessToken, MIN_SECRET_BYTES};
use crate::lockout::{LockoutController, LockoutPolicy};
use crate::password::{CredentialVerifier, HashError};
use crate::rate_limit::{OperationClass, RateLimits, account_key, address_key};
use crate::revocation::RevocationRegistry;
use crate::settings::{AuthSettings, SettingsError};

/// Tokens handed to a client after login or refresh. TTLs are in seconds.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub access_token_ttl: u64,
    pub refresh_token: String,
    pub refresh_token_ttl: u64,
}

impl TokenPair {
    fn new(access: IssuedAccessToken, refresh: IssuedRefreshToken) -> Self {
        let refresh_ttl = refresh
            .record
            .expires_at
            .saturating_sub(refresh.record.created_at);
        Self {
            access_token: access.token,
            access_token_ttl: access.duration,
            refresh_token: refresh.secret,
            refresh_token_ttl: refresh_ttl,
        }
    }
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid settings: {0}")]
    Settings(#[from] SettingsError),
    #[error("password hasher: {0}")]
    Hasher(#[from] HashError),
    #[error("signing secret must be at least {MIN_SECRET_BYTES} bytes")]
    SecretTooShort,
}

/// Everything a [`SessionService`] depends on.
pub struct SessionComponents {
    pub db: Database,
    pub credentials: CredentialVerifier,
    pub access_tokens: AccessTokens,
    pub revocations: Arc<RevocationRegistry>,
    pub lockout: LockoutController,
    pub rate_limits: RateLimits,
    pub clock: SharedClock,
    pub settings: AuthSettings,
}

pub struct SessionService {
    db: Database,
    credentials: CredentialVerifier,
    access_tokens: AccessTokens,
    revocations: Arc<RevocationRegistry>,
    lockout: LockoutController,
    rate_limits: RateLimits,
    clock: SharedClock,
    settings: AuthSettings,
}

/// Log a storage failure with its context and convert it.
fn storage_failure<'a>(
    operation: &'static str,
    principal_id: Option<&'a str>,
) -> impl FnOnce(sqlx::Error) -> AuthError + 'a {
    move |e| {
        error!(principal_id = ?principal_id, operation, error = %e, "Storage failure");
        AuthError::Storage(e)
    }
}

impl SessionService {
    pub fn new(components: SessionComponents) -> Self {
        let SessionComponents {
            db,
            credentials,
            access_tokens,
            revocations,
            lockout,
            rate_limits,
            clock,
            settings,
        } = components;
        Self {
            db,
            credentials,
            access_tokens,
            revocations,
            lockout,
            rate_limits,
            clock,
            settings,
        }
    }

    /// Build every collaborator from settings.
    pub fn from_settings(
        db: Database,
        settings: AuthSettings,
        signing_secret: &[u8],
        clock: SharedClock,
    ) -> Result<Self, SetupError> {
        settings.validate()?;
        if signing_secret.len() < MIN_SECRET_BYTES {
            return Err(SetupError::SecretTooShort);
        }

        let revocations = Arc::new(RevocationRegistry::new(
            clock.clone(),
            settings.clock_skew_secs,
        ));
        let access_tokens = AccessTokens::new(
            signing_secret,
            clock.clone(),
            revocations.clone(),
            settings.access_ttl_secs,
            settings.clock_skew_secs,
        );

        Ok(Self::new(SessionComponents {
            credentials: CredentialVerifier::from_settings(&settings)?,
            lockout: LockoutController::new(LockoutPolicy::from(&settings), clock.clone()),
            rate_limits: RateLimits::new(&settings),
            db,
            access_tokens,
            revocations,
            clock,
            settings,
        }))
    }

    /// Exchange a login identifier and password for a token pair.
    pub async fn authenticate(
        &self,
        origin: &str,
        identifier: &str,
        password: &str,
    ) -> Result<TokenPair, AuthError> {
        self.rate_limits
            .check(OperationClass::Login, &address_key(origin))?;
        self.rate_limits
            .check(OperationClass::Login, &account_key(identifier))?;

        let attempt = self.lockout.begin(identifier).map_err(|retry_after| {
            debug!(identifier = %identifier, "Login attempt on locked identifier");
            AuthError::AccountLocked { retry_after }
        })?;

        let principal = self
            .db
            .users()
            .get_by_username(identifier)
            .await
            .map_err(storage_failure("authenticate", None))?;

        let Some(principal) = principal else {
            self.credentials.verify_dummy(password);
            attempt.fail();
            return Err(AuthError::InvalidCredentials);
        };

        let verified = self
            .credentials
            .verify(password, &principal.password_hash)
            .inspect_err(|_| {
                error!(
                    principal_id = %principal.uuid,
                    operation = "authenticate",
                    "Stored credential record is corrupt"
                );
            })?;

        if !verified {
            attempt.fail();
            return Err(AuthError::InvalidCredentials);
        }

        attempt.succeed();
        self.upgrade_hash(&principal, password).await;

        let pair = self.issue_pair(&principal).await?;
        info!(principal_id = %principal.uuid, origin = %origin, "Authenticated");
        Ok(pair)
    }

    /// Rotate a refresh token and mint a new access token.
    pub async fn refresh(&self, origin: &str, refresh_token: &str) -> Result<TokenPair, AuthError> {
        self.rate_limits
            .check(OperationClass::Refresh, &address_key(origin))?;

        let now = self.clock.now();
        let binding = self.next_access_binding(now);
        let rotation = self
            .tokens()
            .rotate(
                refresh_token,
                now,
                self.settings.refresh_ttl_secs,
                Some(&binding),
            )
            .await
            .map_err(storage_failure("refresh", None))?;

        let issued = match rotation {
            Rotation::Rotated(issued) => issued,
            Rotation::Unknown => return Err(AuthError::UnknownToken),
            Rotation::Revoked => return Err(AuthError::TokenRevoked),
            Rotation::Expired => return Err(AuthError::TokenExpired),
            Rotation::ReuseDetected(revocation) => {
                self.blacklist(&revocation.access_tokens);
                warn!(
                    target: "security_audit",
                    principal_id = %revocation.principal_id,
                    origin = %origin,
                    revoked_refresh_tokens = revocation.revoked,
                    revoked_access_tokens = revocation.access_tokens.len(),
                    "Refresh token reuse detected, chain revoked"
                );
                return Err(AuthError::TokenReuseDetected);
            }
        };

        let principal_id = issued.record.principal_id.clone();
        let principal = self
            .db
            .users()
            .get_by_uuid(&principal_id)
            .await
            .map_err(storage_failure("refresh", Some(&principal_id)))?;

        let Some(principal) = principal else {
            // The account is gone; nothing issued for it should stay usable.
            self.revoke_all(&principal_id).await?;
            return Err(AuthError::UnknownToken);
        };

        let access = self.access_tokens.issue_at(
            binding.token_id,
            now,
            &principal.uuid,
            &principal.username,
            &principal.roles,
        )?;

        debug!(principal_id = %principal_id, "Rotated refresh token");
        Ok(TokenPair::new(access, issued))
    }

    /// Verify an access token.
    pub fn verify(&self, access_token: &str) -> Result<AccessClaims, AuthError> {
        self.access_tokens.verify(access_token)
    }

    /// Log out. Either token may be missing, expired or already revoked.
    pub async fn revoke(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<(), AuthError> {
        if let Some(token) = access_token {
            match self.access_tokens.decode(token) {
                Ok(claims) => self.revocations.add(&claims.jti, claims.exp),
                Err(e) => debug!(error = %e, "Ignoring undecodable access token on logout"),
            }
        }

        if let Some(secret) = refresh_token {
            let now = self.clock.now();
            let record = self
                .tokens()
                .revoke(secret, now)
                .await
                .map_err(storage_failure("revoke", None))?;

            if let Some(record) = record {
                if let (Some(token_id), Some(expires_at)) =
                    (&record.access_token_id, record.access_expires_at)
                {
                    self.revocations.add(token_id, expires_at);
                }
                info!(principal_id = %record.principal_id, "Session revoked");
            }
        }

        Ok(())
    }

    /// Revoke every refresh token of a principal and blacklist their access
    /// tokens. Returns the number of refresh tokens revoked.
    pub async fn revoke_all(&self, principal_id: &str) -> Result<u64, AuthError> {
        let now = self.clock.now();
        let revocation = self
            .tokens()
            .revoke_all(principal_id, now)
            .await
            .map_err(storage_failure("revoke_all", Some(principal_id)))?;

        self.blacklist(&revocation.access_tokens);
        info!(
            principal_id = %principal_id,
            revoked_refresh_tokens = revocation.revoked,
            revoked_access_tokens = revocation.access_tokens.len(),
            "Revoked all sessions"
        );
        Ok(revocation.revoked)
    }

    /// Live refresh tokens of a principal, newest first.
    pub async fn list_sessions(&self, principal_id: &str) -> Result<Vec<RefreshRecord>, AuthError> {
        self.tokens()
            .list_active(principal_id, self.clock.now())
            .await
            .map_err(storage_failure("list_sessions", Some(principal_id)))
    }

    /// Take budget for a password reset request. Delivery happens elsewhere.
    pub fn check_password_reset(&self, origin: &str, identifier: &str) -> Result<(), AuthError> {
        self.rate_limits
            .check(OperationClass::PasswordReset, &address_key(origin))?;
        self.rate_limits
            .check(OperationClass::PasswordReset, &account_key(identifier))
    }

    async fn issue_pair(&self, principal: &Principal) -> Result<TokenPair, AuthError> {
        let now = self.clock.now();
        let binding = self.next_access_binding(now);
        let refresh = self
            .tokens()
            .issue(
                &principal.uuid,
                now,
                self.settings.refresh_ttl_secs,
                Some(&binding),
            )
            .await
            .map_err(storage_failure("issue", Some(&principal.uuid)))?;

        let access = self.access_tokens.issue_at(
            binding.token_id,
            now,
            &principal.uuid,
            &principal.username,
            &principal.roles,
        )?;
        Ok(TokenPair::new(access, refresh))
    }

    /// Identity of the next access token, stored with its refresh token
    /// before the token itself is signed.
    fn next_access_binding(&self, now: u64) -> BoundAccessToken {
        BoundAccessToken {
            token_id: uuid::Uuid::new_v4().to_string(),
            expires_at: now + self.access_tokens.ttl_secs(),
        }
    }

    /// Rehash a verified password stored with outdated parameters.
    /// Failure only costs the upgrade, never the login.
    async fn upgrade_hash(&self, principal: &Principal, password: &str) {
        if !self.credentials.needs_rehash(&principal.password_hash) {
            return;
        }
        let hash = match self.credentials.hash(password) {
            Ok(hash) => hash,
            Err(e) => {
                warn!(principal_id = %principal.uuid, error = %e, "Failed to rehash password");
                return;
            }
        };
        match self.db.users().set_password_hash(&principal.uuid, &hash).await {
            Ok(_) => info!(principal_id = %principal.uuid, "Upgraded password hash parameters"),
            Err(e) => warn!(principal_id = %principal.uuid, error = %e, "Failed to store rehashed password"),
        }
    }

    /// Refresh token store that keeps bound access tokens live through the skew window.
    fn tokens(&self) -> TokenStore {
        self.db
            .tokens()
            .with_access_grace(self.settings.clock_skew_secs)
    }

    fn blacklist(&self, tokens: &[BoundAccessToken]) {
        for token in tokens {
            self.revocations.add(&token.token_id, token.expires_at);
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn credentials(&self) -> &CredentialVerifier {
        &self.credentials
    }

    pub fn revocations(&self) -> &RevocationRegistry {
        &self.revocations
    }

    pub fn lockout(&self) -> &LockoutController {
        &self.lockout
    }

    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }
}
