// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-user provider cool-downs.
//!
//! On an anthropic-kind 429 the engine records a cool-down keyed by a
//! stable hash of the user's bearer token. While the entry is live the
//! selector excludes anthropic-kind candidates for that user, making the
//! reroute preemptive instead of reactive. Entries expire on wall clock.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

/// Cool-down kind recorded for anthropic rate limits.
pub const ANTHROPIC_429: &str = "anthropic-429";

#[derive(Debug, Clone)]
pub struct CooldownEntry {
    pub kind: String,
    pub expires_at: Instant,
}

impl CooldownEntry {
    pub fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Stable per-user key: SHA-256 hex of the bearer token. The raw token is
/// never stored.
pub fn user_key(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[derive(Debug, Default)]
pub struct CooldownMap {
    inner: RwLock<HashMap<String, CooldownEntry>>,
}

impl CooldownMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a cool-down for `token`.
    pub fn note(&self, token: &str, kind: &str, ttl: Duration) {
        let entry = CooldownEntry {
            kind: kind.to_string(),
            expires_at: Instant::now() + ttl,
        };
        self.inner
            .write()
            .expect("cooldown lock poisoned")
            .insert(user_key(token), entry);
    }

    /// The live cool-down kind for `token`, if any.
    ///
    /// Read path takes only the read lock; expired entries are left in
    /// place for [`purge_expired`][Self::purge_expired].
    pub fn active(&self, token: &str) -> Option<String> {
        let map = self.inner.read().expect("cooldown lock poisoned");
        let entry = map.get(&user_key(token))?;
        entry.is_live(Instant::now()).then(|| entry.kind.clone())
    }

    /// Number of live cool-downs.
    pub fn live_count(&self) -> usize {
        let now = Instant::now();
        self.inner
            .read()
            .expect("cooldown lock poisoned")
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    /// Drop expired entries. Called periodically by the maintenance loop.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.inner
            .write()
            .expect("cooldown lock poisoned")
            .retain(|_, e| e.is_live(now));
    }
}
