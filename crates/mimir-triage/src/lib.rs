// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Triage classification: feature vector → bucket probabilities.
//!
//! The primary path evaluates the GBDT ensemble shipped in the tuning
//! artifact. The heuristic path covers every failure mode (unsupported
//! framework, malformed blob, non-finite values) so classification
//! itself never fails. The loaded model is tied to the artifact version
//! and reloaded when the artifact hot-swaps.

mod gbdt;
mod heuristic;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};

use mimir_artifact::Artifact;
use mimir_features::Features;

pub use gbdt::{order_features, softmax, GbdtError, GbdtModel};

/// One of the three cost/quality tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Cheap,
    Mid,
    Hard,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cheap => "cheap",
            Self::Mid => "mid",
            Self::Hard => "hard",
        }
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bucket probabilities; always sum to 1 within floating-point tolerance.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BucketProbs {
    pub cheap: f32,
    pub mid: f32,
    pub hard: f32,
}

impl BucketProbs {
    /// Build from non-negative raw scores, normalizing to sum 1.
    /// All-zero input degenerates to the uniform distribution.
    pub fn normalized(cheap: f32, mid: f32, hard: f32) -> Self {
        let sum = cheap + mid + hard;
        if sum <= 0.0 || !sum.is_finite() {
            return Self {
                cheap: 1.0 / 3.0,
                mid: 1.0 / 3.0,
                hard: 1.0 / 3.0,
            };
        }
        Self {
            cheap: cheap / sum,
            mid: mid / sum,
            hard: hard / sum,
        }
    }

    pub fn sum(&self) -> f32 {
        self.cheap + self.mid + self.hard
    }

    /// The most probable bucket (ties resolve toward cheaper).
    pub fn argmax(&self) -> Bucket {
        if self.cheap >= self.mid && self.cheap >= self.hard {
            Bucket::Cheap
        } else if self.mid >= self.hard {
            Bucket::Mid
        } else {
            Bucket::Hard
        }
    }
}

/// Classifier statistics, exported on `/stats`.
#[derive(Debug, Default)]
pub struct TriageStats {
    pub total: AtomicU64,
    pub gbdt_ok: AtomicU64,
    pub heuristic_fallbacks: AtomicU64,
    predict_micros: AtomicU64,
    load_micros: AtomicU64,
    loads: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct TriageStatsSnapshot {
    pub total: u64,
    pub gbdt_ok: u64,
    pub heuristic_fallbacks: u64,
    pub avg_predict_micros: u64,
    pub avg_load_micros: u64,
}

impl TriageStats {
    pub fn snapshot(&self) -> TriageStatsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let loads = self.loads.load(Ordering::Relaxed);
        TriageStatsSnapshot {
            total,
            gbdt_ok: self.gbdt_ok.load(Ordering::Relaxed),
            heuristic_fallbacks: self.heuristic_fallbacks.load(Ordering::Relaxed),
            avg_predict_micros: self.predict_micros.load(Ordering::Relaxed) / total.max(1),
            avg_load_micros: self.load_micros.load(Ordering::Relaxed) / loads.max(1),
        }
    }
}

struct LoadedModel {
    version: String,
    /// `None` when the current artifact's blob failed to load; the
    /// heuristic path serves until the next artifact swap.
    model: Option<GbdtModel>,
}

pub struct TriageClassifier {
    loaded: RwLock<LoadedModel>,
    stats: TriageStats,
}

impl Default for TriageClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl TriageClassifier {
    pub fn new() -> Self {
        Self {
            loaded: RwLock::new(LoadedModel {
                version: String::new(),
                model: None,
            }),
            stats: TriageStats::default(),
        }
    }

    pub fn stats(&self) -> &TriageStats {
        &self.stats
    }

    /// Classify `features` under `artifact`.
    ///
    /// Returns probabilities summing to 1. Never fails; the heuristic
    /// classifier covers every GBDT failure mode.
    pub fn classify(&self, features: &Features, artifact: &Artifact) -> BucketProbs {
        let start = Instant::now();
        self.stats.total.fetch_add(1, Ordering::Relaxed);
        self.ensure_loaded(artifact);

        let probs = {
            let loaded = self.loaded.read().expect("triage lock poisoned");
            match &loaded.model {
                Some(model) => {
                    let x = gbdt::order_features(features, &artifact.gbdt.feature_schema);
                    match model.margins(&x) {
                        Ok(margins) => {
                            let p = gbdt::softmax(margins);
                            self.stats.gbdt_ok.fetch_add(1, Ordering::Relaxed);
                            BucketProbs::normalized(p[0], p[1], p[2])
                        }
                        Err(e) => {
                            warn!(error = %e, "gbdt predict failed, using heuristic");
                            self.stats
                                .heuristic_fallbacks
                                .fetch_add(1, Ordering::Relaxed);
                            heuristic::classify(features)
                        }
                    }
                }
                None => {
                    self.stats
                        .heuristic_fallbacks
                        .fetch_add(1, Ordering::Relaxed);
                    heuristic::classify(features)
                }
            }
        };

        self.stats
            .predict_micros
            .fetch_add(start.elapsed().as_micros() as u64, Ordering::Relaxed);
        probs
    }

    /// Reload the model when the artifact version changed.
    fn ensure_loaded(&self, artifact: &Artifact) {
        {
            let loaded = self.loaded.read().expect("triage lock poisoned");
            if loaded.version == artifact.version {
                return;
            }
        }
        let start = Instant::now();
        let model = match GbdtModel::from_artifact(&artifact.gbdt) {
            Ok(m) => {
                debug!(version = %artifact.version, "gbdt model loaded");
                Some(m)
            }
            Err(e) => {
                warn!(version = %artifact.version, error = %e, "gbdt model failed to load");
                None
            }
        };
        self.stats
            .load_micros
            .fetch_add(start.elapsed().as_micros() as u64, Ordering::Relaxed);
        self.stats.loads.fetch_add(1, Ordering::Relaxed);
        let mut loaded = self.loaded.write().expect("triage lock poisoned");
        // A racing loader may have won; last writer wins, both loaded the
        // same artifact version.
        loaded.version = artifact.version.clone();
        loaded.model = model;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(token_count: usize, has_code: bool) -> Features {
        Features {
            embedding: vec![],
            cluster_id: 0,
            top_p_distances: vec![0.2, 0.5, 1.0],
            token_count,
            context_ratio: (token_count as f32 / 200_000.0).clamp(0.0, 1.0),
            has_code,
            has_math: false,
            ngram_entropy: 5.0,
            embedding_fallback: false,
            user_success_rate: None,
            avg_latency_ms: None,
        }
    }

    #[test]
    fn probabilities_sum_to_one() {
        let c = TriageClassifier::new();
        let a = mimir_artifact::emergency();
        let p = c.classify(&features(20, false), &a);
        assert!((p.sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn gbdt_path_is_used_for_valid_artifact() {
        let c = TriageClassifier::new();
        let a = mimir_artifact::emergency();
        c.classify(&features(20, false), &a);
        let s = c.stats().snapshot();
        assert_eq!(s.gbdt_ok, 1);
        assert_eq!(s.heuristic_fallbacks, 0);
    }

    #[test]
    fn unsupported_framework_falls_back_to_heuristic() {
        let c = TriageClassifier::new();
        let mut a = mimir_artifact::emergency();
        a.gbdt.framework = "onnx".into();
        a.version = "broken-1".into();
        let p = c.classify(&features(20, false), &a);
        assert!((p.sum() - 1.0).abs() < 1e-6);
        assert_eq!(c.stats().snapshot().heuristic_fallbacks, 1);
    }

    #[test]
    fn non_finite_feature_falls_back_to_heuristic() {
        let c = TriageClassifier::new();
        let a = mimir_artifact::emergency();
        let mut f = features(20, false);
        f.ngram_entropy = f32::NAN;
        let p = c.classify(&f, &a);
        assert!((p.sum() - 1.0).abs() < 1e-6);
        assert_eq!(c.stats().snapshot().heuristic_fallbacks, 1);
    }

    #[test]
    fn model_reloads_on_version_change() {
        let c = TriageClassifier::new();
        let a1 = mimir_artifact::emergency();
        c.classify(&features(20, false), &a1);
        let mut a2 = mimir_artifact::emergency();
        a2.version = "v2".into();
        c.classify(&features(20, false), &a2);
        // Two loads: one per version.
        let s = c.stats().snapshot();
        assert!(s.avg_load_micros > 0 || s.total == 2);
        assert_eq!(c.loaded.read().unwrap().version, "v2");
    }

    #[test]
    fn argmax_prefers_cheaper_on_ties() {
        let p = BucketProbs {
            cheap: 0.4,
            mid: 0.4,
            hard: 0.2,
        };
        assert_eq!(p.argmax(), Bucket::Cheap);
    }

    #[test]
    fn normalized_handles_all_zero_scores() {
        let p = BucketProbs::normalized(0.0, 0.0, 0.0);
        assert!((p.sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn short_prompt_classified_cheap_long_classified_hard() {
        let c = TriageClassifier::new();
        let a = mimir_artifact::emergency();
        let short = c.classify(&features(20, false), &a);
        assert_eq!(short.argmax(), Bucket::Cheap);
        let long = c.classify(&features(250_000, false), &a);
        assert_eq!(long.argmax(), Bucket::Hard);
    }
}
