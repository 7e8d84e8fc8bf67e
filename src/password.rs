//! Password hashing and verification.
//!
//! Hashes are argon2id PHC strings: algorithm, version, cost parameters, salt
//! and digest all live in the stored value, so the configured cost can be
//! raised without invalidating existing records.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{
        self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng,
    },
};
use thiserror::Error;

use crate::error::AuthError;
use crate::settings::AuthSettings;

/// Longest password accepted, in bytes.
pub const MAX_PASSWORD_BYTES: usize = 1024;

/// Plaintext hashed once at startup so unknown accounts still pay for a verification.
const DUMMY_PASSWORD: &str = "tollgate-timing-equaliser";

#[derive(Debug, Error)]
pub enum HashError {
    #[error("password exceeds {MAX_PASSWORD_BYTES} bytes")]
    TooLong,
    #[error("invalid argon2 parameters: {0}")]
    Params(#[from] argon2::Error),
    #[error("hashing failed: {0}")]
    Hashing(#[from] password_hash::Error),
}

/// Hashes and checks passwords with a fixed argon2id configuration.
pub struct CredentialVerifier {
    argon2: Argon2<'static>,
    dummy_hash: String,
}

impl CredentialVerifier {
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self, HashError> {
        let params = Params::new(memory_kib, iterations, parallelism, None)?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let dummy_hash = hash_with(&argon2, DUMMY_PASSWORD)?;
        Ok(Self { argon2, dummy_hash })
    }

    pub fn from_settings(settings: &AuthSettings) -> Result<Self, HashError> {
        Self::new(
            settings.argon2_memory_kib,
            settings.argon2_iterations,
            settings.argon2_parallelism,
        )
    }

    /// Hash a password with a fresh random salt.
    pub fn hash(&self, password: &str) -> Result<String, HashError> {
        if password.len() > MAX_PASSWORD_BYTES {
            return Err(HashError::TooLong);
        }
        hash_with(&self.argon2, password)
    }

    /// Check a password against a stored hash.
    ///
    /// A wrong password is `Ok(false)`; an unparseable record is
    /// `CorruptCredentialRecord`. The digest comparison is constant time.
    pub fn verify(&self, password: &str, encoded: &str) -> Result<bool, AuthError> {
        let parsed = PasswordHash::new(encoded).map_err(|_| AuthError::CorruptCredentialRecord)?;
        if password.len() > MAX_PASSWORD_BYTES {
            // Never matches, but pays for a verification like any wrong password.
            self.verify_dummy(password);
            return Ok(false);
        }
        match self.argon2.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(_) => Err(AuthError::CorruptCredentialRecord),
        }
    }

    /// Spend one verification on a throwaway hash. Used for unknown accounts
    /// so their response time matches a wrong password.
    pub fn verify_dummy(&self, password: &str) {
        let bytes = password.as_bytes();
        let bytes = &bytes[..bytes.len().min(MAX_PASSWORD_BYTES)];
        if let Ok(parsed) = PasswordHash::new(&self.dummy_hash) {
            let _ = self.argon2.verify_password(bytes, &parsed);
        }
    }

    /// Whether a stored hash was produced with different parameters than the current ones.
    pub fn needs_rehash(&self, encoded: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(encoded) else {
            return true;
        };
        if parsed.algorithm != Algorithm::Argon2id.ident() {
            return true;
        }
        match Params::try_from(&parsed) {
            Ok(stored) => {
                let current = self.argon2.params();
                stored.m_cost() != current.m_cost()
                    || stored.t_cost() != current.t_cost()
                    || stored.p_cost() != current.p_cost()
            }
            Err(_) => true,
        }
    }
}

fn hash_with(argon2: &Argon2<'_>, password: &str) -> Result<String, HashError> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(argon2.hash_password(password.as_bytes(), &salt)?.to_string())
}
