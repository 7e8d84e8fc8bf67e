//! Rate limiting for authentication operations.
//!
//! Uses a token bucket algorithm keyed by originating identifier. Each
//! operation class has its own limiter because login, refresh and password
//! reset have different abuse profiles.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::keyed::DefaultKeyedStateStore,
};
use tracing::debug;

use crate::error::AuthError;
use crate::settings::AuthSettings;

/// Per-key limiter.
pub type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Operation classes with separate budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationClass {
    Login,
    Refresh,
    PasswordReset,
}

impl OperationClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::Login => "login",
            OperationClass::Refresh => "refresh",
            OperationClass::PasswordReset => "password_reset",
        }
    }
}

/// Rate limiters for every operation class.
pub struct RateLimits {
    login: KeyedLimiter,
    refresh: KeyedLimiter,
    password_reset: KeyedLimiter,
    clock: DefaultClock,
}

impl RateLimits {
    pub fn new(settings: &AuthSettings) -> Self {
        Self {
            // Login: small burst per address or account (prevents brute force)
            login: RateLimiter::keyed(quota(settings.login_burst, settings.login_period_secs)),
            // Refresh: generous, clients refresh on a timer
            refresh: RateLimiter::keyed(quota(
                settings.refresh_burst,
                settings.refresh_period_secs,
            )),
            // Password reset: a handful per long period (prevents mail spam)
            password_reset: RateLimiter::keyed(quota(
                settings.password_reset_burst,
                settings.password_reset_period_secs,
            )),
            clock: DefaultClock::default(),
        }
    }

    fn limiter(&self, class: OperationClass) -> &KeyedLimiter {
        match class {
            OperationClass::Login => &self.login,
            OperationClass::Refresh => &self.refresh,
            OperationClass::PasswordReset => &self.password_reset,
        }
    }

    /// Take one unit of budget for `key`, or report how long to wait.
    pub fn check(&self, class: OperationClass, key: &str) -> Result<(), AuthError> {
        match self.limiter(class).check_key(&key.to_string()) {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let retry_after = not_until.wait_time_from(self.clock.now());
                debug!(
                    class = class.as_str(),
                    key = %key,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Rate limit exceeded"
                );
                Err(AuthError::RateLimitExceeded { retry_after })
            }
        }
    }

    /// Forget keys whose buckets have fully replenished.
    pub fn sweep(&self) {
        for limiter in [&self.login, &self.refresh, &self.password_reset] {
            limiter.retain_recent();
            limiter.shrink_to_fit();
        }
    }

    pub fn tracked_keys(&self, class: OperationClass) -> usize {
        self.limiter(class).len()
    }
}

fn quota(burst: u32, period_secs: u64) -> Quota {
    let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
    Quota::with_period(Duration::from_secs(period_secs.max(1)))
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
        .allow_burst(burst)
}

/// Budget key for a client network address.
pub fn address_key(address: &str) -> String {
    format!("addr:{}", address)
}

/// Budget key for an account identifier.
pub fn account_key(identifier: &str) -> String {
    format!("account:{}", identifier.trim().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> RateLimits {
        RateLimits::new(&AuthSettings {
            login_burst: 2,
            login_period_secs: 60,
            refresh_burst: 3,
            refresh_period_secs: 60,
            password_reset_burst: 1,
            password_reset_period_secs: 600,
            ..AuthSettings::default()
        })
    }

    #[test]
    fn test_burst_then_limited() {
        let limits = limits();
        assert!(limits.check(OperationClass::Login, "addr:1.2.3.4").is_ok());
        assert!(limits.check(OperationClass::Login, "addr:1.2.3.4").is_ok());

        match limits.check(OperationClass::Login, "addr:1.2.3.4") {
            Err(AuthError::RateLimitExceeded { retry_after }) => {
                assert!(retry_after > Duration::ZERO);
                assert!(retry_after <= Duration::from_secs(60));
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[test]
    fn test_keys_are_isolated() {
        let limits = limits();
        for _ in 0..2 {
            limits.check(OperationClass::Login, "addr:1.2.3.4").unwrap();
        }
        assert!(limits.check(OperationClass::Login, "addr:1.2.3.4").is_err());
        assert!(limits.check(OperationClass::Login, "addr:5.6.7.8").is_ok());
    }

    #[test]
    fn test_classes_have_separate_budgets() {
        let limits = limits();
        for _ in 0..2 {
            limits.check(OperationClass::Login, "addr:1.2.3.4").unwrap();
        }
        assert!(limits.check(OperationClass::Login, "addr:1.2.3.4").is_err());

        for _ in 0..3 {
            limits.check(OperationClass::Refresh, "addr:1.2.3.4").unwrap();
        }
        assert!(limits.check(OperationClass::Refresh, "addr:1.2.3.4").is_err());

        limits
            .check(OperationClass::PasswordReset, "addr:1.2.3.4")
            .unwrap();
        assert!(
            limits
                .check(OperationClass::PasswordReset, "addr:1.2.3.4")
                .is_err()
        );
    }

    #[test]
    fn test_keys_helpers() {
        assert_eq!(address_key("10.0.0.1"), "addr:10.0.0.1");
        assert_eq!(account_key(" Alice "), "account:alice");
    }

    #[test]
    fn test_sweep_keeps_exhausted_keys() {
        let limits = limits();
        for _ in 0..3 {
            let _ = limits.check(OperationClass::Login, "addr:1.2.3.4");
        }
        limits.sweep();
        assert_eq!(limits.tracked_keys(OperationClass::Login), 1);
        assert!(limits.check(OperationClass::Login, "addr:1.2.3.4").is_err());
    }
}
