// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Embedding backends.
//!
//! The extractor tries a remote primary, then an optional secondary, each
//! under the remaining latency budget. When every backend fails it falls
//! back to a deterministic hash embedding, which cannot fail — routing
//! quality degrades, availability does not.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("embedding backend returned status {0}")]
    Status(u16),
    #[error("embedding request failed: {0}")]
    Network(String),
    #[error("embedding response malformed: {0}")]
    BadResponse(String),
}

#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn embed(&self, text: &str, dim: usize) -> Result<Vec<f32>, EmbedError>;
}

/// HTTP embedding backend.
///
/// POSTs `{"input": <text>, "dimensions": <dim>}` and expects
/// `{"embedding": [f32, ...]}` back.
pub struct RemoteBackend {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl RemoteBackend {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl EmbeddingBackend for RemoteBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn embed(&self, text: &str, dim: usize) -> Result<Vec<f32>, EmbedError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "input": text, "dimensions": dim }))
            .send()
            .await
            .map_err(|e| EmbedError::Network(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(EmbedError::Status(resp.status().as_u16()));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| EmbedError::BadResponse(e.to_string()))?;
        let arr = body["embedding"]
            .as_array()
            .ok_or_else(|| EmbedError::BadResponse("missing embedding field".into()))?;
        let vec: Vec<f32> = arr
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        if vec.len() != dim {
            debug!(
                backend = %self.name,
                got = vec.len(),
                want = dim,
                "embedding dimension mismatch"
            );
            return Err(EmbedError::BadResponse(format!(
                "expected {dim} dims, got {}",
                vec.len()
            )));
        }
        Ok(vec)
    }
}

/// Deterministic fallback embedding: spread SHA-256 bytes of the text over
/// [-1, 1], re-hashing with a counter until `dim` values are produced, then
/// L2-normalize. Same text → same vector, on every host, forever.
pub fn deterministic_embedding(text: &str, dim: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(dim);
    let mut counter: u32 = 0;
    while out.len() < dim {
        let mut hasher = Sha256::new();
        hasher.update(counter.to_le_bytes());
        hasher.update(text.as_bytes());
        let digest = hasher.finalize();
        for byte in digest {
            if out.len() == dim {
                break;
            }
            out.push((byte as f32 / 127.5) - 1.0);
        }
        counter += 1;
    }
    let norm: f32 = out.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut out {
            *v /= norm;
        }
    }
    out
}
