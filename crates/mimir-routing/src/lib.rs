// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Routing policy and selection: bucket choice, candidate shortlist,
//! α-weighted ranking, decision construction, and per-user cool-downs.
mod bucket;
mod cooldown;
mod select;

pub use bucket::{choose_bucket, shortlist, BucketChoice, PolicyParams};
pub use cooldown::{user_key, CooldownEntry, CooldownMap, ANTHROPIC_429};
pub use select::{
    build_decision, rank, score, thinking_for, Decision, FallbackCandidate,
    ScoredCandidate, ThinkingDirective,
};
