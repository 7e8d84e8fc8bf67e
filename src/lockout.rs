//! Progressive account lockout.
//!
//! Failed logins are counted per login identifier. Crossing the short
//! threshold locks the identifier briefly; crossing the long threshold locks
//! it for longer. A successful login clears the state.

use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::settings::AuthSettings;

/// Lockout thresholds and durations.
#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub short_threshold: u32,
    pub short_lock_secs: u64,
    pub long_threshold: u32,
    pub long_lock_secs: u64,
    /// Failures older than this restart the count.
    pub failure_window_secs: u64,
}

impl From<&AuthSettings> for LockoutPolicy {
    fn from(settings: &AuthSettings) -> Self {
        Self {
            short_threshold: settings.lockout_short_threshold,
            short_lock_secs: settings.lockout_short_secs,
            long_threshold: settings.lockout_long_threshold,
            long_lock_secs: settings.lockout_long_secs,
            failure_window_secs: settings.failure_window_secs,
        }
    }
}

/// Failure history for one identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockoutState {
    pub failures: u32,
    pub last_failure: u64,
    pub locked_until: Option<u64>,
    /// Attempts that passed the gate and have not reported back yet.
    pub in_flight: u32,
}

pub struct LockoutController {
    states: DashMap<String, LockoutState>,
    policy: LockoutPolicy,
    clock: SharedClock,
}

/// Returned when an identifier already has as many attempts in progress as
/// would lock it.
const BUSY_RETRY: Duration = Duration::from_secs(1);

impl LockoutController {
    pub fn new(policy: LockoutPolicy, clock: SharedClock) -> Self {
        Self {
            states: DashMap::new(),
            policy,
            clock,
        }
    }

    /// Admit one authentication attempt for an identifier, or return how long
    /// to wait. The lock check and the reservation happen under one entry
    /// guard, so concurrent guesses never outnumber the failures left before
    /// the next lock.
    pub fn begin(&self, identifier: &str) -> Result<Attempt<'_>, Duration> {
        let now = self.clock.now();
        let key = normalize(identifier);
        let mut state = self.states.entry(key.clone()).or_default();

        if let Some(until) = state.locked_until.filter(|until| *until > now) {
            return Err(Duration::from_secs(until - now));
        }
        if self.is_stale(&state, now) {
            state.failures = 0;
        }

        let allowed = self.policy.short_threshold.saturating_sub(state.failures).max(1);
        if state.in_flight >= allowed {
            debug!(identifier = %identifier, in_flight = state.in_flight, "Too many concurrent attempts");
            return Err(BUSY_RETRY);
        }
        state.in_flight += 1;

        Ok(Attempt {
            controller: self,
            key,
            identifier: identifier.to_string(),
            finished: false,
        })
    }

    fn finish_failure(&self, key: &str, identifier: &str) -> Option<Duration> {
        let now = self.clock.now();
        let mut state = self.states.entry(key.to_string()).or_default();
        state.in_flight = state.in_flight.saturating_sub(1);

        if self.is_stale(&state, now) {
            state.failures = 0;
        }
        state.failures = state.failures.saturating_add(1);
        state.last_failure = now;

        let lock_secs = if state.failures >= self.policy.long_threshold {
            Some(self.policy.long_lock_secs)
        } else if state.failures >= self.policy.short_threshold {
            Some(self.policy.short_lock_secs)
        } else {
            None
        };

        let lock_secs = lock_secs?;
        state.locked_until = Some(now + lock_secs);
        warn!(
            identifier = %identifier,
            failures = state.failures,
            lock_secs,
            "Identifier locked after repeated authentication failures"
        );
        Some(Duration::from_secs(lock_secs))
    }

    fn finish_success(&self, key: &str, identifier: &str) {
        if self.states.remove(key).is_some_and(|(_, state)| state.failures > 0) {
            info!(identifier = %identifier, "Cleared lockout state");
        }
    }

    fn release(&self, key: &str) {
        if let Some(mut state) = self.states.get_mut(key) {
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.states.remove_if(key, |_, state| {
            state.in_flight == 0 && state.failures == 0 && state.locked_until.is_none()
        });
    }

    fn is_stale(&self, state: &LockoutState, now: u64) -> bool {
        state.failures > 0
            && now.saturating_sub(state.last_failure) > self.policy.failure_window_secs
    }

    pub fn state(&self, identifier: &str) -> Option<LockoutState> {
        self.states.get(&normalize(identifier)).map(|s| s.clone())
    }

    /// Drop entries that are neither locked, busy, nor inside the failure window.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let window = self.policy.failure_window_secs;
        let before = self.states.len();
        self.states.retain(|_, state| {
            let locked = state.locked_until.is_some_and(|until| until > now);
            let recent = state.failures > 0 && now.saturating_sub(state.last_failure) <= window;
            locked || recent || state.in_flight > 0
        });
        before.saturating_sub(self.states.len())
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// An admitted attempt. Report the outcome with [`Attempt::fail`] or
/// [`Attempt::succeed`]; dropping it releases the slot without counting a
/// failure.
pub struct Attempt<'a> {
    controller: &'a LockoutController,
    key: String,
    identifier: String,
    finished: bool,
}

impl Attempt<'_> {
    /// Count a failed attempt and return the lockout it triggered, if any.
    pub fn fail(mut self) -> Option<Duration> {
        self.finished = true;
        self.controller.finish_failure(&self.key, &self.identifier)
    }

    /// Forget the identifier's failure history.
    pub fn succeed(mut self) {
        self.finished = true;
        self.controller.finish_success(&self.key, &self.identifier);
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.controller.release(&self.key);
        }
    }
}

/// Login identifiers are case-insensitive.
fn normalize(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}
