// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Gradient-boosted tree evaluation over the artifact blob.
//!
//! The blob is a JSON ensemble (`framework: "gbdt-json"`): one additive
//! tree list per class, evaluated against the feature vector ordered by
//! `gbdt.feature_schema`. Class margins go through softmax to produce
//! bucket probabilities. The schema, not this module, is the contract:
//! the tuning pipeline may reorder or extend features freely as long as
//! the shipped schema matches the shipped trees.

use serde::Deserialize;

use mimir_features::Features;

#[derive(Debug, thiserror::Error)]
pub enum GbdtError {
    #[error("unsupported gbdt framework {0:?}")]
    UnsupportedFramework(String),
    #[error("gbdt blob malformed: {0}")]
    BadBlob(String),
    #[error("gbdt produced a non-finite value")]
    NonFinite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GbdtModel {
    #[serde(default)]
    base_score: f32,
    classes: Vec<ClassTrees>,
}

#[derive(Debug, Clone, Deserialize)]
struct ClassTrees {
    trees: Vec<Tree>,
}

#[derive(Debug, Clone, Deserialize)]
struct Tree {
    nodes: Vec<Node>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Node {
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
    },
    Leaf {
        leaf: f32,
    },
}

impl GbdtModel {
    /// Parse the artifact blob. Only the `gbdt-json` framework has an
    /// in-process evaluator; anything else reports unsupported so the
    /// caller can fall back to the heuristic classifier.
    pub fn from_artifact(gbdt: &mimir_artifact::GbdtArtifact) -> Result<Self, GbdtError> {
        if gbdt.framework != "gbdt-json" {
            return Err(GbdtError::UnsupportedFramework(gbdt.framework.clone()));
        }
        let model: GbdtModel = serde_json::from_value(gbdt.blob.clone())
            .map_err(|e| GbdtError::BadBlob(e.to_string()))?;
        if model.classes.len() != 3 {
            return Err(GbdtError::BadBlob(format!(
                "expected 3 classes, got {}",
                model.classes.len()
            )));
        }
        Ok(model)
    }

    /// Raw class margins for an ordered feature vector.
    pub fn margins(&self, x: &[f32]) -> Result<[f32; 3], GbdtError> {
        if x.iter().any(|v| !v.is_finite()) {
            return Err(GbdtError::NonFinite);
        }
        let mut out = [self.base_score; 3];
        for (ci, class) in self.classes.iter().enumerate() {
            for tree in &class.trees {
                out[ci] += eval_tree(tree, x)?;
            }
            if !out[ci].is_finite() {
                return Err(GbdtError::NonFinite);
            }
        }
        Ok(out)
    }
}

fn eval_tree(tree: &Tree, x: &[f32]) -> Result<f32, GbdtError> {
    let mut idx = 0usize;
    // Bounded walk: a well-formed tree terminates in at most `nodes.len()`
    // steps; a cyclic one is malformed.
    for _ in 0..=tree.nodes.len() {
        match tree.nodes.get(idx) {
            Some(Node::Leaf { leaf }) => return Ok(*leaf),
            Some(Node::Split {
                feature,
                threshold,
                left,
                right,
            }) => {
                // Features beyond the vector are missing; missing goes left.
                let value = x.get(*feature).copied().unwrap_or(0.0);
                idx = if value <= *threshold { *left } else { *right };
            }
            None => {
                return Err(GbdtError::BadBlob(format!("node index {idx} out of range")))
            }
        }
    }
    Err(GbdtError::BadBlob("cycle in tree".into()))
}

/// Softmax over class margins.
pub fn softmax(margins: [f32; 3]) -> [f32; 3] {
    let max = margins.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps = margins.map(|m| (m - max).exp());
    let sum: f32 = exps.iter().sum();
    exps.map(|e| e / sum)
}

/// Assemble the ordered feature vector for `schema`.
///
/// Missing features are imputed: zeros in general, `top_dist_*` pad to
/// 1.0, `user_success_rate` to 0.5, `avg_latency` to 1000.
pub fn order_features(f: &Features, schema: &[String]) -> Vec<f32> {
    schema
        .iter()
        .map(|name| match name.as_str() {
            "token_count" => f.token_count as f32,
            "context_ratio" => f.context_ratio,
            "has_code" => f.has_code as u8 as f32,
            "has_math" => f.has_math as u8 as f32,
            "ngram_entropy" => f.ngram_entropy,
            "cluster_id" => f.cluster_id as f32,
            "user_success_rate" => f.user_success_rate.unwrap_or(0.5),
            "avg_latency" => f.avg_latency_ms.unwrap_or(1_000.0),
            other => {
                if let Some(i) = other
                    .strip_prefix("top_dist_")
                    .and_then(|s| s.parse::<usize>().ok())
                {
                    f.top_p_distances.get(i).copied().unwrap_or(1.0)
                } else {
                    0.0
                }
            }
        })
        .collect()
}
