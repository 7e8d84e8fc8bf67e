//! Revocation registry for access tokens.
//!
//! Maps a token ID to the moment the token stops verifying on its own: its
//! `exp` plus the clock-skew tolerance the verifier grants. An entry only
//! matters until then, so sweeping dead entries keeps the map bounded by one
//! access-token TTL worth of revocations.

use dashmap::DashMap;
use tracing::debug;

use crate::clock::SharedClock;

pub struct RevocationRegistry {
    entries: DashMap<String, u64>,
    clock: SharedClock,
    grace_secs: u64,
}

impl RevocationRegistry {
    /// `grace_secs` is the skew the verifier allows past `exp`.
    pub fn new(clock: SharedClock, grace_secs: u64) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            grace_secs,
        }
    }

    /// Revoke a token ID whose `exp` claim is `expires_at`. Tokens that no
    /// longer verify anyway are not recorded.
    pub fn add(&self, token_id: &str, expires_at: u64) {
        let until = expires_at.saturating_add(self.grace_secs);
        if until <= self.clock.now() {
            return;
        }
        self.entries
            .entry(token_id.to_string())
            .and_modify(|existing| *existing = (*existing).max(until))
            .or_insert(until);
    }

    pub fn is_revoked(&self, token_id: &str) -> bool {
        self.entries
            .get(token_id)
            .is_some_and(|expires_at| *expires_at > self.clock.now())
    }

    /// Drop entries whose token has expired. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "Swept revocation registry");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
