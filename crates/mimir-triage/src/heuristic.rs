// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Heuristic bucket classifier.
//!
//! Simple additive scoring over lexical and context features, used when
//! the GBDT model fails to load or predict. Scores start from a prior
//! that favors cheap, and individual signals shift weight toward mid and
//! hard before normalization.

use mimir_features::Features;

use crate::BucketProbs;

/// Token count above which a request stops looking cheap.
const LONG_PROMPT_TOKENS: usize = 2_000;
/// Token count that makes a request look hard regardless of content.
const VERY_LONG_PROMPT_TOKENS: usize = 20_000;
/// Trigram entropy above this suggests dense, varied input.
const HIGH_ENTROPY_BITS: f32 = 6.5;

pub fn classify(f: &Features) -> BucketProbs {
    // Prior: most traffic is cheap.
    let mut cheap = 1.0f32;
    let mut mid = 0.55f32;
    let mut hard = 0.25f32;

    if f.token_count > LONG_PROMPT_TOKENS {
        hard += 0.35;
        cheap -= 0.3;
    }
    if f.token_count > VERY_LONG_PROMPT_TOKENS {
        hard += 0.6;
        cheap -= 0.4;
    }
    if f.has_code {
        mid += 0.4;
        hard += 0.2;
        cheap -= 0.15;
    }
    if f.has_math {
        mid += 0.25;
        hard += 0.35;
        cheap -= 0.15;
    }
    if f.ngram_entropy > HIGH_ENTROPY_BITS {
        mid += 0.3;
    }
    if f.context_ratio > 0.5 {
        hard += 0.8;
        cheap -= 0.3;
    }

    BucketProbs::normalized(cheap.max(0.0), mid.max(0.0), hard.max(0.0))
}
