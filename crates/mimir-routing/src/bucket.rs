// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Bucket policy: probabilities → bucket, plus the candidate shortlist.

use mimir_catalog::{CatalogSnapshot, ModelCapability, ProviderKind};
use mimir_features::Features;
use mimir_triage::{Bucket, BucketProbs};

#[derive(Debug, Clone, Copy)]
pub struct PolicyParams {
    pub cheap_threshold: f32,
    pub hard_threshold: f32,
    pub long_context_trigger: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketChoice {
    pub bucket: Bucket,
    /// The context guardrail fired: large-context families are required.
    pub long_context: bool,
}

/// Apply the policy rules in order; first match wins.
///
/// 1. Context guardrail: token count at or above the trigger forces hard.
/// 2. `P(cheap) ≥ τc` → cheap.
/// 3. `P(hard) ≥ τh` → hard.
/// 4. Default → mid.
pub fn choose_bucket(probs: &BucketProbs, features: &Features, params: &PolicyParams) -> BucketChoice {
    if features.token_count >= params.long_context_trigger {
        return BucketChoice {
            bucket: Bucket::Hard,
            long_context: true,
        };
    }
    if probs.cheap >= params.cheap_threshold {
        return BucketChoice {
            bucket: Bucket::Cheap,
            long_context: false,
        };
    }
    if probs.hard >= params.hard_threshold {
        return BucketChoice {
            bucket: Bucket::Hard,
            long_context: false,
        };
    }
    BucketChoice {
        bucket: Bucket::Mid,
        long_context: false,
    }
}

/// Build the candidate shortlist for a chosen bucket.
///
/// Keeps configured candidates that resolve in the catalog and fit the
/// request's input size. Aggregator models from excluded authors are
/// dropped here — independently of any cool-down filtering, which the
/// selector applies later. Under the long-context guardrail the list is
/// narrowed to large-context families when any candidate qualifies.
pub fn shortlist<'a>(
    snapshot: &'a CatalogSnapshot,
    candidates: &[String],
    token_count: usize,
    long_context: bool,
    exclude_authors: &[String],
) -> Vec<&'a ModelCapability> {
    let mut list: Vec<&ModelCapability> = candidates
        .iter()
        .filter_map(|slug| snapshot.lookup(slug))
        .filter(|m| m.fits_context(token_count))
        .filter(|m| {
            if m.provider != ProviderKind::Aggregator {
                return true;
            }
            match &m.author {
                Some(author) => !exclude_authors.iter().any(|a| a == author),
                None => true,
            }
        })
        .collect();

    if long_context {
        let long: Vec<&ModelCapability> = list
            .iter()
            .copied()
            .filter(|m| m.is_long_context())
            .collect();
        if !long.is_empty() {
            list = long;
        }
    }
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimir_catalog::{bundled_catalog, SnapshotSource};

    fn params() -> PolicyParams {
        PolicyParams {
            cheap_threshold: 0.62,
            hard_threshold: 0.58,
            long_context_trigger: 200_000,
        }
    }

    fn features(token_count: usize) -> Features {
        Features {
            embedding: vec![],
            cluster_id: 0,
            top_p_distances: vec![1.0, 1.0, 1.0],
            token_count,
            context_ratio: 0.0,
            has_code: false,
            has_math: false,
            ngram_entropy: 4.0,
            embedding_fallback: false,
            user_success_rate: None,
            avg_latency_ms: None,
        }
    }

    fn probs(cheap: f32, mid: f32, hard: f32) -> BucketProbs {
        BucketProbs::normalized(cheap, mid, hard)
    }

    fn snapshot() -> CatalogSnapshot {
        CatalogSnapshot::new(bundled_catalog(), SnapshotSource::Live)
    }

    #[test]
    fn cheap_threshold_selects_cheap() {
        let c = choose_bucket(&probs(0.7, 0.2, 0.1), &features(20), &params());
        assert_eq!(c.bucket, Bucket::Cheap);
        assert!(!c.long_context);
    }

    #[test]
    fn hard_threshold_selects_hard() {
        let c = choose_bucket(&probs(0.1, 0.2, 0.7), &features(20), &params());
        assert_eq!(c.bucket, Bucket::Hard);
    }

    #[test]
    fn default_is_mid() {
        let c = choose_bucket(&probs(0.4, 0.35, 0.25), &features(20), &params());
        assert_eq!(c.bucket, Bucket::Mid);
    }

    #[test]
    fn guardrail_fires_exactly_at_trigger() {
        // Even a confidently-cheap classification is overridden.
        let c = choose_bucket(&probs(0.9, 0.05, 0.05), &features(200_000), &params());
        assert_eq!(c.bucket, Bucket::Hard);
        assert!(c.long_context);
        let below = choose_bucket(&probs(0.9, 0.05, 0.05), &features(199_999), &params());
        assert_eq!(below.bucket, Bucket::Cheap);
    }

    #[test]
    fn shortlist_drops_unknown_models() {
        let snap = snapshot();
        let list = shortlist(
            &snap,
            &["claude-opus-4-6".into(), "no-such-model".into()],
            100,
            false,
            &[],
        );
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].slug, "claude-opus-4-6");
    }

    #[test]
    fn shortlist_drops_models_that_do_not_fit() {
        let snap = snapshot();
        // deepseek/deepseek-r1 has 128k context in the bundled catalog.
        let list = shortlist(
            &snap,
            &["deepseek/deepseek-r1".into(), "gemini-2.5-pro".into()],
            300_000,
            false,
            &[],
        );
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].slug, "gemini-2.5-pro");
    }

    #[test]
    fn shortlist_excludes_aggregator_authors() {
        let snap = snapshot();
        let list = shortlist(
            &snap,
            &["deepseek/deepseek-r1".into(), "qwen/qwen-2.5-72b-instruct".into()],
            100,
            false,
            &["deepseek".into()],
        );
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].slug, "qwen/qwen-2.5-72b-instruct");
    }

    #[test]
    fn author_exclusion_does_not_touch_native_providers() {
        let snap = snapshot();
        // "anthropic" in exclude_authors must not drop anthropic-kind models;
        // it only filters aggregator-served entries.
        let list = shortlist(&snap, &["claude-opus-4-6".into()], 100, false, &["anthropic".into()]);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn long_context_narrows_to_large_families() {
        let snap = snapshot();
        let list = shortlist(
            &snap,
            &["claude-opus-4-6".into(), "gemini-3-pro".into()],
            100,
            true,
            &[],
        );
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].slug, "gemini-3-pro");
    }

    #[test]
    fn long_context_keeps_list_when_no_large_family_fits() {
        let snap = snapshot();
        let list = shortlist(&snap, &["claude-opus-4-6".into()], 100, true, &[]);
        // No ≥1M candidate available: better a fitting model than none.
        assert_eq!(list.len(), 1);
    }
}
