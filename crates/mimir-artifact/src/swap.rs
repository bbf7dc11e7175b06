// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Atomic publish cell for hot-swappable shared values.
//!
//! [`Swap<T>`] wraps `Arc<RwLock<Arc<T>>>`: readers take a cheap snapshot
//! and hold it for as long as they need; a writer replaces the inner
//! pointer under a write lock held only for the swap itself. A request
//! that pins a snapshot at entry observes one consistent value from
//! entry to exit regardless of concurrent swaps.

use std::sync::{Arc, RwLock};

pub struct Swap<T: Send + Sync + 'static>(Arc<RwLock<Arc<T>>>);

impl<T: Send + Sync + 'static> Swap<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(RwLock::new(Arc::new(value))))
    }

    /// Return a snapshot of the current value.
    ///
    /// The returned `Arc` stays valid across subsequent [`set`][Self::set]
    /// calls; it simply refers to the old value.
    #[must_use]
    pub fn get(&self) -> Arc<T> {
        self.0.read().expect("Swap lock poisoned").clone()
    }

    /// Atomically publish a new value.
    pub fn set(&self, value: T) {
        *self.0.write().expect("Swap lock poisoned") = Arc::new(value);
    }
}

impl<T: Send + Sync + 'static> Clone for Swap<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Send + Sync + std::fmt::Debug + 'static> std::fmt::Debug for Swap<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Swap({:?})", self.get())
    }
}
