// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Model catalog client: capability and pricing records for every
//! routable model, with TTL caching and graceful degradation.
mod client;
mod types;

pub use client::{bundled_catalog, CatalogClient, CatalogSnapshot, SnapshotSource};
pub use types::*;
