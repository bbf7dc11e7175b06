// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Feature extraction: reduce a request to the numeric vector the triage
//! classifier consumes, within a strict latency budget.
//!
//! The extractor never fails a request. Every sub-step has a fallback
//! (cached embedding → remote backend → deterministic hash embedding;
//! degraded cluster assignment), and the whole extraction degrades to
//! defaults when the budget expires.

mod cache;
mod centroids;
mod embed;
mod lexical;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use mimir_artifact::Artifact;

pub use cache::{cache_key, EmbeddingCache};
pub use centroids::{cosine_distance, nearest};
pub use embed::{deterministic_embedding, EmbedError, EmbeddingBackend, RemoteBackend};
pub use lexical::{estimate_tokens, has_code, has_math, trigram_entropy};

/// Distances to this many nearest centroids are kept.
pub const TOP_K: usize = 3;

/// Upper bound on the text that is hashed and embedded. Inputs beyond this
/// are lexically representative enough; embedding megabytes buys nothing.
const MAX_EMBED_BYTES: usize = 32 * 1024;

/// Per-request feature vector, frozen after extraction.
#[derive(Debug, Clone, Serialize)]
pub struct Features {
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub cluster_id: usize,
    pub top_p_distances: Vec<f32>,
    pub token_count: usize,
    pub context_ratio: f32,
    pub has_code: bool,
    pub has_math: bool,
    pub ngram_entropy: f32,
    /// True when the deterministic hash embedding was used.
    pub embedding_fallback: bool,
    /// Per-user success-rate signal, when the caller has one.
    pub user_success_rate: Option<f32>,
    /// Per-user average-latency signal in milliseconds.
    pub avg_latency_ms: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct ExtractorOptions {
    /// Total extraction budget. Default 25 ms.
    pub budget: Duration,
    /// Embedding dimension used when the artifact has no centroids.
    pub embedding_dim: usize,
    /// Denominator of `context_ratio` (the model-family context the ratio
    /// is measured against).
    pub reference_ctx: usize,
    pub cache_entries: usize,
    pub cache_ttl: Duration,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            budget: Duration::from_millis(25),
            embedding_dim: 384,
            reference_ctx: 200_000,
            cache_entries: 12_288,
            cache_ttl: Duration::from_secs(86_400),
        }
    }
}

pub struct FeatureExtractor {
    backends: Vec<Arc<dyn EmbeddingBackend>>,
    cache: EmbeddingCache,
    opts: ExtractorOptions,
}

impl FeatureExtractor {
    /// Extractor with no remote backends: every embedding is deterministic.
    pub fn new(opts: ExtractorOptions) -> Self {
        Self::with_backends(opts, Vec::new())
    }

    /// Extractor with an ordered backend chain (primary first).
    pub fn with_backends(
        opts: ExtractorOptions,
        backends: Vec<Arc<dyn EmbeddingBackend>>,
    ) -> Self {
        Self {
            cache: EmbeddingCache::new(opts.cache_entries, opts.cache_ttl),
            backends,
            opts,
        }
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Extract features for the concatenated message text.
    ///
    /// Returns within `budget` plus a small tolerance; on sub-timeouts the
    /// affected features take their default values.
    pub async fn extract(&self, text: &str, artifact: &Artifact) -> Features {
        let start = Instant::now();

        let token_count = lexical::estimate_tokens(text);
        let context_ratio =
            (token_count as f32 / self.opts.reference_ctx.max(1) as f32).clamp(0.0, 1.0);

        let embed_text = truncate_utf8(text, MAX_EMBED_BYTES);
        let dim = match artifact.embedding_dim() {
            0 => self.opts.embedding_dim,
            d => d,
        };

        // Lexical analysis is CPU-bound and runs concurrently with the
        // (possibly remote) embedding resolution.
        let (embedding_res, (code, math, entropy)) = tokio::join!(
            self.resolve_embedding(embed_text, dim, start),
            async {
                (
                    lexical::has_code(text),
                    lexical::has_math(text),
                    lexical::trigram_entropy(embed_text),
                )
            }
        );
        let (embedding, embedding_fallback) = embedding_res;

        let (cluster_id, top_p_distances) =
            centroids::nearest(&artifact.centroids, &embedding, TOP_K);

        let elapsed = start.elapsed();
        if elapsed > self.opts.budget {
            debug!(?elapsed, "feature extraction exceeded budget, degraded values in use");
        }

        Features {
            embedding,
            cluster_id,
            top_p_distances,
            token_count,
            context_ratio,
            has_code: code,
            has_math: math,
            ngram_entropy: entropy,
            embedding_fallback,
            user_success_rate: None,
            avg_latency_ms: None,
        }
    }

    /// Cache → backend chain → deterministic fallback.
    ///
    /// Each backend call gets the remaining budget as its deadline. Only
    /// backend-produced vectors are cached; the deterministic fallback is
    /// recomputed so a recovered backend replaces it on the next miss.
    async fn resolve_embedding(
        &self,
        text: &str,
        dim: usize,
        start: Instant,
    ) -> (Vec<f32>, bool) {
        let key = cache::cache_key(text);
        if let Some(hit) = self.cache.get(&key) {
            if hit.len() == dim {
                return (hit, false);
            }
            // Dimension changed under us (artifact swap); drop through.
        }

        for backend in &self.backends {
            let remaining = self.opts.budget.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, backend.embed(text, dim)).await {
                Ok(Ok(vec)) => {
                    self.cache.put(key, vec.clone());
                    return (vec, false);
                }
                Ok(Err(e)) => {
                    debug!(backend = backend.name(), error = %e, "embedding backend failed");
                }
                Err(_) => {
                    debug!(backend = backend.name(), "embedding backend timed out");
                }
            }
        }

        if !self.backends.is_empty() {
            // All backends failed — soft condition, not an error.
            warn!("all embedding backends unavailable, using deterministic fallback");
        }
        (embed::deterministic_embedding(text, dim), true)
    }
}

/// Truncate to at most `max_bytes` without splitting a UTF-8 sequence.
fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
