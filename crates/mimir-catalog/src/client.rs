// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Read-only client for the model catalog collaborator.
//!
//! The catalog is a separate process exposing a small HTTP API. This
//! client caches the `/v1/models` response for a short TTL and keeps
//! serving the previous snapshot while the catalog is unreachable. A
//! bundled catalog guarantees a usable snapshot before the first
//! successful fetch.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::types::{ModelCapability, Pricing, ProviderKind};

/// Where the current snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    /// The bundled emergency catalog; no successful fetch yet.
    Bundled,
    /// A live `/v1/models` response within TTL.
    Live,
    /// A previously live response kept past TTL because the catalog is
    /// currently unreachable.
    Stale,
}

/// An immutable view of the catalog at one point in time.
///
/// Requests pin one snapshot for their whole lifetime so candidate
/// filtering and pricing lookups are mutually consistent.
#[derive(Debug)]
pub struct CatalogSnapshot {
    models: Vec<ModelCapability>,
    by_slug: HashMap<String, usize>,
    pub source: SnapshotSource,
}

impl CatalogSnapshot {
    pub fn new(models: Vec<ModelCapability>, source: SnapshotSource) -> Self {
        let by_slug = models
            .iter()
            .enumerate()
            .map(|(i, m)| (m.slug.clone(), i))
            .collect();
        Self { models, by_slug, source }
    }

    pub fn models(&self) -> &[ModelCapability] {
        &self.models
    }

    /// Look up a single model by slug.
    pub fn lookup(&self, slug: &str) -> Option<&ModelCapability> {
        self.by_slug.get(slug).map(|&i| &self.models[i])
    }

    pub fn pricing(&self, slug: &str) -> Option<Pricing> {
        self.lookup(slug).map(|m| m.pricing)
    }

    pub fn models_for(&self, kind: ProviderKind) -> impl Iterator<Item = &ModelCapability> {
        self.models.iter().filter(move |m| m.provider == kind)
    }
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelCapability>,
}

/// Parse the bundled emergency catalog.
pub fn bundled_catalog() -> Vec<ModelCapability> {
    let yaml = include_str!("../models.yaml");
    let parsed: ModelsResponse =
        serde_yaml::from_str(yaml).expect("bundled models.yaml must be valid");
    parsed.models
}

pub struct CatalogClient {
    base_url: String,
    ttl: Duration,
    client: reqwest::Client,
    state: RwLock<State>,
}

struct State {
    snapshot: Arc<CatalogSnapshot>,
    fetched_at: Option<Instant>,
}

impl CatalogClient {
    /// Create a client seeded with the bundled catalog.
    pub fn new(base_url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            ttl,
            client: reqwest::Client::new(),
            state: RwLock::new(State {
                snapshot: Arc::new(CatalogSnapshot::new(
                    bundled_catalog(),
                    SnapshotSource::Bundled,
                )),
                fetched_at: None,
            }),
        }
    }

    /// Current snapshot, refreshing first when the TTL has expired.
    ///
    /// Never fails: on fetch error the previous snapshot is returned with
    /// its source downgraded to [`SnapshotSource::Stale`].
    pub async fn snapshot(&self) -> Arc<CatalogSnapshot> {
        let needs_refresh = {
            let state = self.state.read().expect("catalog lock poisoned");
            match state.fetched_at {
                Some(at) => at.elapsed() >= self.ttl,
                None => true,
            }
        };
        if needs_refresh {
            if let Err(e) = self.refresh().await {
                warn!(error = %e, "catalog unreachable, serving previous snapshot");
                self.mark_stale();
            }
        }
        self.state.read().expect("catalog lock poisoned").snapshot.clone()
    }

    /// Fetch `/v1/models` and replace the snapshot.
    pub async fn refresh(&self) -> anyhow::Result<()> {
        let url = format!("{}/v1/models", self.base_url.trim_end_matches('/'));
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        let body: ModelsResponse = resp.json().await?;
        debug!(count = body.models.len(), "catalog snapshot refreshed");
        let mut state = self.state.write().expect("catalog lock poisoned");
        state.snapshot = Arc::new(CatalogSnapshot::new(body.models, SnapshotSource::Live));
        state.fetched_at = Some(Instant::now());
        Ok(())
    }

    fn mark_stale(&self) {
        let mut state = self.state.write().expect("catalog lock poisoned");
        if state.snapshot.source == SnapshotSource::Live {
            state.snapshot = Arc::new(CatalogSnapshot::new(
                state.snapshot.models.clone(),
                SnapshotSource::Stale,
            ));
        }
        // Back off for one TTL before retrying so an unreachable catalog
        // does not add a connect timeout to every request.
        state.fetched_at = Some(Instant::now());
    }

    /// `GET /v1/capabilities/{slug}` — live lookup for a model that is not
    /// in the cached snapshot.
    pub async fn capability(&self, slug: &str) -> anyhow::Result<ModelCapability> {
        let url = format!(
            "{}/v1/capabilities/{slug}",
            self.base_url.trim_end_matches('/')
        );
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        Ok(resp.json().await?)
    }

    /// `GET /v1/pricing/{slug}` — live pricing for a model missing from
    /// the cached snapshot.
    pub async fn pricing(&self, slug: &str) -> anyhow::Result<Pricing> {
        let url = format!("{}/v1/pricing/{slug}", self.base_url.trim_end_matches('/'));
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        Ok(resp.json().await?)
    }

    /// `GET /v1/feature-flags` — opaque map, forwarded as-is.
    pub async fn feature_flags(&self) -> anyhow::Result<serde_json::Value> {
        let url = format!("{}/v1/feature-flags", self.base_url.trim_end_matches('/'));
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        Ok(resp.json().await?)
    }

    /// `GET /health` — catalog liveness plus statistics.
    pub async fn health(&self) -> anyhow::Result<serde_json::Value> {
        let url = format!("{}/health", self.base_url.trim_end_matches('/'));
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        Ok(resp.json().await?)
    }

    /// Replace the snapshot directly. Test/bootstrap hook: lets callers
    /// seed a deterministic catalog without a live collaborator.
    pub fn install_snapshot(&self, models: Vec<ModelCapability>) {
        let mut state = self.state.write().expect("catalog lock poisoned");
        state.snapshot = Arc::new(CatalogSnapshot::new(models, SnapshotSource::Live));
        state.fetched_at = Some(Instant::now());
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
