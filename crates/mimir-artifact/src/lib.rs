// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tuning artifact: the immutable, versioned value carrying everything the
//! routing pipeline learns offline — α, bucket thresholds, penalty
//! scalars, cluster centroids, per-cluster quality scores, normalized
//! costs, and the triage classifier blob.
//!
//! The artifact is a value, not a service: loaded as JSON, fingerprinted,
//! wrapped in an [`Arc`], and published by atomic pointer swap. An
//! embedded emergency artifact guarantees the router can run without any
//! network access.

mod loader;
mod swap;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use loader::ArtifactLoader;
pub use swap::Swap;

/// Bucket probability thresholds fitted by the tuning pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Thresholds {
    pub cheap: f32,
    pub hard: f32,
}

/// Penalty scalars applied by the selector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Penalties {
    pub latency_sd: f32,
    pub ctx_over_80pct: f32,
}

/// The triage classifier payload: an opaque blob evaluated against an
/// ordered feature vector. `feature_schema` is the real contract — the
/// classifier assembles its input in exactly this order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbdtArtifact {
    /// Framework tag, e.g. `"gbdt-json"`.
    pub framework: String,
    pub feature_schema: Vec<String>,
    pub blob: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Monotonic version string (timestamp at fit time).
    pub version: String,
    /// Quality-vs-cost weight in [0,1].
    pub alpha: f32,
    pub thresholds: Thresholds,
    pub penalties: Penalties,
    /// Cluster centroids; all rows share one dimension.
    pub centroids: Vec<Vec<f32>>,
    /// Per-model quality scores, one entry per cluster.
    pub qhat: HashMap<String, Vec<f32>>,
    /// Per-model normalized cost in [0,1].
    pub chat: HashMap<String, f32>,
    /// Per-model latency standard-deviation hint consumed by the
    /// selector's penalty term. Missing models default to 0.
    #[serde(default)]
    pub latency_sd_hint: HashMap<String, f32>,
    pub gbdt: GbdtArtifact,
    /// SHA-256 of the raw artifact bytes; set by the loader.
    #[serde(skip)]
    pub fingerprint: String,
}

impl Artifact {
    pub fn num_clusters(&self) -> usize {
        self.centroids.len()
    }

    /// Embedding dimension implied by the cluster space.
    pub fn embedding_dim(&self) -> usize {
        self.centroids.first().map(Vec::len).unwrap_or(0)
    }

    /// Check structural invariants. Called by the loader before a swap so
    /// a malformed artifact never reaches the hot path.
    pub fn validate(&self) -> Result<(), ArtifactError> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(ArtifactError::Invalid(format!(
                "alpha {} outside [0,1]",
                self.alpha
            )));
        }
        if self.centroids.is_empty() {
            return Err(ArtifactError::Invalid("no centroids".into()));
        }
        let dim = self.centroids[0].len();
        if self.centroids.iter().any(|c| c.len() != dim) {
            return Err(ArtifactError::Invalid("ragged centroid rows".into()));
        }
        let clusters = self.centroids.len();
        for (slug, q) in &self.qhat {
            if q.len() != clusters {
                return Err(ArtifactError::Invalid(format!(
                    "qhat[{slug}] has {} entries, expected {clusters}",
                    q.len()
                )));
            }
        }
        for (slug, c) in &self.chat {
            if !(0.0..=1.0).contains(c) {
                return Err(ArtifactError::Invalid(format!(
                    "chat[{slug}] = {c} outside [0,1]"
                )));
            }
        }
        Ok(())
    }

    /// Quality score for `slug` in `cluster`. Models without quality data
    /// impute a conservative mean.
    pub fn quality(&self, slug: &str, cluster: usize) -> f32 {
        self.qhat
            .get(slug)
            .and_then(|q| q.get(cluster))
            .copied()
            .unwrap_or(0.5)
    }

    /// Normalized cost for `slug`. Unknown models impute mid-range cost so
    /// they are neither favored nor buried.
    pub fn cost(&self, slug: &str) -> f32 {
        self.chat.get(slug).copied().unwrap_or(0.5)
    }

    pub fn latency_sd(&self, slug: &str) -> f32 {
        self.latency_sd_hint.get(slug).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact failed validation: {0}")]
    Invalid(String),
    #[error("artifact unavailable: {0}")]
    Unavailable(String),
}

/// The embedded emergency artifact: degraded cluster count, reasonable
/// defaults. Guarantees the router can serve before any network fetch.
pub fn emergency() -> Artifact {
    let raw = include_str!("../emergency.json");
    let mut artifact: Artifact =
        serde_json::from_str(raw).expect("embedded emergency artifact must be valid");
    artifact.fingerprint = loader::fingerprint(raw.as_bytes());
    artifact
        .validate()
        .expect("embedded emergency artifact must pass validation");
    artifact
}
