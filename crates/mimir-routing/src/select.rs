// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! α-score selection: rank a shortlist and build the routing decision.
//!
//! Per candidate `m`, with `w` the health weight of `m`'s provider kind
//! (1.0 healthy, 0.5 degraded):
//! ```text
//! score_m = α·qhat[m][cluster]·w − (1−α)·chat[m]
//!         − latency_sd_penalty·latency_sd_hint[m]
//!         − ctx_penalty·1{context_ratio > 0.8}
//! ```
//! A degraded provider is deprioritized, never dropped — exclusion is a
//! separate mechanism (cool-downs, rate-limit marks, unhealthy kinds).
//! Ties break by ascending cost, then by configured candidate order, so
//! re-scoring a fixed features/artifact pair is byte-identical.

use std::collections::HashMap;

use serde::Serialize;

use mimir_artifact::Artifact;
use mimir_catalog::{ModelCapability, ProviderKind};
use mimir_config::{AggregatorProviderPrefs, RouterConfig};
use mimir_features::Features;
use mimir_triage::Bucket;

/// Context-pressure point above which the overflow penalty applies.
const CTX_PENALTY_RATIO: f32 = 0.8;

#[derive(Debug, Clone, Serialize)]
pub struct ScoredCandidate {
    pub slug: String,
    pub provider: ProviderKind,
    pub score: f32,
}

/// Requested thinking depth carried on the decision; the executing driver
/// clamps it to the catalog ranges of the chosen model.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingDirective {
    Effort(String),
    Budget(u32),
}

#[derive(Debug, Clone, Serialize)]
pub struct FallbackCandidate {
    pub provider: ProviderKind,
    pub model: String,
}

/// The routing decision: a pure value carried downstream.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub id: String,
    pub provider: ProviderKind,
    pub model: String,
    pub bucket: Bucket,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingDirective>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Aggregator routing preferences, set only for aggregator primaries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_prefs: Option<AggregatorProviderPrefs>,
    /// Name of the auth adapter whose credentials the engine resolves
    /// for this call.
    pub auth_adapter: String,
    /// Ordered alternates tried on retryable failures.
    pub fallbacks: Vec<FallbackCandidate>,
    pub artifact_version: String,
    /// Full ranking, for records and the `route` debugging command.
    pub scores: Vec<ScoredCandidate>,
}

/// Score one candidate. `health_weight` scales the quality term so a
/// degraded provider loses standing without leaving the ranking.
pub fn score(
    artifact: &Artifact,
    slug: &str,
    cluster: usize,
    context_ratio: f32,
    health_weight: f32,
) -> f32 {
    let q = artifact.quality(slug, cluster);
    let c = artifact.cost(slug);
    let mut pen = artifact.penalties.latency_sd * artifact.latency_sd(slug);
    if context_ratio > CTX_PENALTY_RATIO {
        pen += artifact.penalties.ctx_over_80pct;
    }
    artifact.alpha * q * health_weight - (1.0 - artifact.alpha) * c - pen
}

/// Rank `shortlist` best-first, excluding `excluded_kinds` (cool-downs,
/// rate-limit marks, unhealthy kinds, 429 reroutes).
///
/// `health_weights` maps provider kinds to their current selection
/// weight; kinds absent from the map count as fully healthy (1.0).
/// `candidate_order` is the configured list for the bucket; its index is
/// the final tie-break.
pub fn rank(
    artifact: &Artifact,
    shortlist: &[&ModelCapability],
    features: &Features,
    candidate_order: &[String],
    excluded_kinds: &[ProviderKind],
    health_weights: &HashMap<ProviderKind, f32>,
) -> Vec<ScoredCandidate> {
    let order_index = |slug: &str| {
        candidate_order
            .iter()
            .position(|c| c == slug)
            .unwrap_or(usize::MAX)
    };

    let mut scored: Vec<ScoredCandidate> = shortlist
        .iter()
        .filter(|m| !excluded_kinds.contains(&m.provider))
        .map(|m| {
            let weight = health_weights.get(&m.provider).copied().unwrap_or(1.0);
            ScoredCandidate {
                slug: m.slug.clone(),
                provider: m.provider,
                score: score(
                    artifact,
                    &m.slug,
                    features.cluster_id,
                    features.context_ratio,
                    weight,
                ),
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                artifact
                    .cost(&a.slug)
                    .partial_cmp(&artifact.cost(&b.slug))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| order_index(&a.slug).cmp(&order_index(&b.slug)))
    });
    scored
}

/// Build the decision from a non-empty ranking.
///
/// The top candidate becomes the primary; the next ≤ `top_p` entries the
/// ordered fallback list. Thinking defaults come from the bucket config;
/// the cheap bucket never requests thinking.
pub fn build_decision(
    ranked: Vec<ScoredCandidate>,
    bucket: Bucket,
    router: &RouterConfig,
    artifact_version: &str,
    max_tokens: Option<u32>,
) -> Option<Decision> {
    let primary = ranked.first()?.clone();

    let thinking = match bucket {
        Bucket::Cheap => None,
        Bucket::Mid => thinking_for(&router.bucket_defaults.mid, primary.provider),
        Bucket::Hard => thinking_for(&router.bucket_defaults.hard, primary.provider),
    };

    let fallbacks = ranked
        .iter()
        .skip(1)
        .take(router.top_p)
        .map(|c| FallbackCandidate {
            provider: c.provider,
            model: c.slug.clone(),
        })
        .collect();

    let provider_prefs = (primary.provider == ProviderKind::Aggregator)
        .then(|| router.aggregator.provider.clone());

    Some(Decision {
        id: uuid::Uuid::new_v4().to_string(),
        provider: primary.provider,
        model: primary.slug.clone(),
        bucket,
        thinking,
        max_tokens,
        provider_prefs,
        auth_adapter: primary.provider.as_str().to_string(),
        fallbacks,
        artifact_version: artifact_version.to_string(),
        scores: ranked,
    })
}

/// Pick the directive shape the provider kind understands.
pub fn thinking_for(
    defaults: &mimir_config::ThinkingDefault,
    provider: ProviderKind,
) -> Option<ThinkingDirective> {
    match provider {
        // OpenAI-kind models take a reasoning-effort enum.
        ProviderKind::Openai => defaults
            .effort
            .clone()
            .map(ThinkingDirective::Effort),
        // Anthropic and Gemini take an integer budget.
        ProviderKind::Anthropic | ProviderKind::Gemini => {
            defaults.budget.map(ThinkingDirective::Budget)
        }
        // The aggregator forwards effort when set, budget otherwise.
        ProviderKind::Aggregator => defaults
            .effort
            .clone()
            .map(ThinkingDirective::Effort)
            .or(defaults.budget.map(ThinkingDirective::Budget)),
    }
}
