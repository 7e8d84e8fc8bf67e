//! Tunable policy for tokens, lockouts and rate limits.
//!
//! Every value can be set on the command line or through a `TOLLGATE_*`
//! environment variable. Defaults match the documented policy.

use std::time::Duration;

use thiserror::Error;

/// Seconds in one minute.
const MINUTE: u64 = 60;

#[derive(clap::Args, Debug, Clone)]
pub struct AuthSettings {
    /// Access token lifetime in seconds
    #[arg(long, env = "TOLLGATE_ACCESS_TTL", default_value_t = 15 * MINUTE)]
    pub access_ttl_secs: u64,

    /// Refresh token lifetime in seconds
    #[arg(long, env = "TOLLGATE_REFRESH_TTL", default_value_t = 7 * 24 * 60 * MINUTE)]
    pub refresh_ttl_secs: u64,

    /// Tolerated clock difference when checking token timestamps
    #[arg(long, env = "TOLLGATE_CLOCK_SKEW", default_value_t = 30)]
    pub clock_skew_secs: u64,

    /// Consecutive failures before the short lockout applies
    #[arg(long, env = "TOLLGATE_LOCKOUT_SHORT_THRESHOLD", default_value_t = 5)]
    pub lockout_short_threshold: u32,

    /// Length of the short lockout in seconds
    #[arg(long, env = "TOLLGATE_LOCKOUT_SHORT", default_value_t = 5 * MINUTE)]
    pub lockout_short_secs: u64,

    /// Consecutive failures before the long lockout applies
    #[arg(long, env = "TOLLGATE_LOCKOUT_LONG_THRESHOLD", default_value_t = 10)]
    pub lockout_long_threshold: u32,

    /// Length of the long lockout in seconds
    #[arg(long, env = "TOLLGATE_LOCKOUT_LONG", default_value_t = 30 * MINUTE)]
    pub lockout_long_secs: u64,

    /// Failures older than this no longer count towards a lockout
    #[arg(long, env = "TOLLGATE_FAILURE_WINDOW", default_value_t = 24 * 60 * MINUTE)]
    pub failure_window_secs: u64,

    /// Login attempts allowed in a burst per client address or account
    #[arg(long, env = "TOLLGATE_LOGIN_BURST", default_value_t = 5)]
    pub login_burst: u32,

    /// Seconds for one login attempt to replenish
    #[arg(long, env = "TOLLGATE_LOGIN_PERIOD", default_value_t = 2)]
    pub login_period_secs: u64,

    /// Refresh attempts allowed in a burst per client address
    #[arg(long, env = "TOLLGATE_REFRESH_BURST", default_value_t = 20)]
    pub refresh_burst: u32,

    /// Seconds for one refresh attempt to replenish
    #[arg(long, env = "TOLLGATE_REFRESH_PERIOD", default_value_t = 1)]
    pub refresh_period_secs: u64,

    /// Password-reset requests allowed in a burst per client address or account
    #[arg(long, env = "TOLLGATE_RESET_BURST", default_value_t = 3)]
    pub password_reset_burst: u32,

    /// Seconds for one password-reset request to replenish
    #[arg(long, env = "TOLLGATE_RESET_PERIOD", default_value_t = 20 * MINUTE)]
    pub password_reset_period_secs: u64,

    /// Argon2 memory cost in KiB
    #[arg(long, env = "TOLLGATE_ARGON2_MEMORY_KIB", default_value_t = 19 * 1024)]
    pub argon2_memory_kib: u32,

    /// Argon2 iteration count
    #[arg(long, env = "TOLLGATE_ARGON2_ITERATIONS", default_value_t = 2)]
    pub argon2_iterations: u32,

    /// Argon2 lanes
    #[arg(long, env = "TOLLGATE_ARGON2_PARALLELISM", default_value_t = 1)]
    pub argon2_parallelism: u32,

    /// How long expired refresh records are kept for audit before deletion
    #[arg(long, env = "TOLLGATE_REFRESH_RETENTION", default_value_t = 24 * 60 * MINUTE)]
    pub refresh_retention_secs: u64,

    /// Seconds between maintenance sweeps
    #[arg(long, env = "TOLLGATE_SWEEP_INTERVAL", default_value_t = MINUTE)]
    pub sweep_interval_secs: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            access_ttl_secs: 15 * MINUTE,
            refresh_ttl_secs: 7 * 24 * 60 * MINUTE,
            clock_skew_secs: 30,
            lockout_short_threshold: 5,
            lockout_short_secs: 5 * MINUTE,
            lockout_long_threshold: 10,
            lockout_long_secs: 30 * MINUTE,
            failure_window_secs: 24 * 60 * MINUTE,
            login_burst: 5,
            login_period_secs: 2,
            refresh_burst: 20,
            refresh_period_secs: 1,
            password_reset_burst: 3,
            password_reset_period_secs: 20 * MINUTE,
            argon2_memory_kib: 19 * 1024,
            argon2_iterations: 2,
            argon2_parallelism: 1,
            refresh_retention_secs: 24 * 60 * MINUTE,
            sweep_interval_secs: MINUTE,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("access token lifetime must be shorter than refresh token lifetime")]
    AccessOutlivesRefresh,
    #[error("long lockout threshold must be above the short threshold")]
    LockoutThresholdOrder,
    #[error("clock skew must be shorter than the access token lifetime")]
    SkewTooLarge,
}

impl AuthSettings {
    /// Reject combinations that would make the policy meaningless.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let non_zero: [(&'static str, u64); 12] = [
            ("access_ttl_secs", self.access_ttl_secs),
            ("refresh_ttl_secs", self.refresh_ttl_secs),
            ("lockout_short_threshold", self.lockout_short_threshold.into()),
            ("lockout_short_secs", self.lockout_short_secs),
            ("lockout_long_secs", self.lockout_long_secs),
            ("login_burst", self.login_burst.into()),
            ("login_period_secs", self.login_period_secs),
            ("refresh_burst", self.refresh_burst.into()),
            ("refresh_period_secs", self.refresh_period_secs),
            ("password_reset_burst", self.password_reset_burst.into()),
            ("password_reset_period_secs", self.password_reset_period_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, v)| *v == 0) {
            return Err(SettingsError::Zero(name));
        }
        if self.access_ttl_secs >= self.refresh_ttl_secs {
            return Err(SettingsError::AccessOutlivesRefresh);
        }
        if self.lockout_long_threshold <= self.lockout_short_threshold {
            return Err(SettingsError::LockoutThresholdOrder);
        }
        if self.clock_skew_secs >= self.access_ttl_secs {
            return Err(SettingsError::SkewTooLarge);
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
