// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use sha2::{Digest, Sha256};

/// In-memory embedding cache: LRU with per-entry TTL, keyed by a strong
/// hash of the prompt text. Writes are last-writer-wins — the value is a
/// pure function of the key, so a race between two misses is harmless.
pub struct EmbeddingCache {
    inner: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
}

struct Entry {
    vec: Vec<f32>,
    inserted: Instant,
}

/// Cache key: SHA-256 hex of the (truncated) prompt text.
pub fn cache_key(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

impl EmbeddingCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("max(1) is non-zero");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Fetch an entry. Expired entries are evicted on access.
    pub fn get(&self, key: &str) -> Option<Vec<f32>> {
        let mut cache = self.inner.lock().expect("embedding cache poisoned");
        match cache.get(key) {
            Some(e) if e.inserted.elapsed() < self.ttl => Some(e.vec.clone()),
            Some(_) => {
                cache.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, vec: Vec<f32>) {
        let mut cache = self.inner.lock().expect("embedding cache poisoned");
        cache.put(
            key,
            Entry {
                vec,
                inserted: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("embedding cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
