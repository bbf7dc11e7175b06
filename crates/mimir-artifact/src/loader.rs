// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use anyhow::Context;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::Artifact;

/// SHA-256 hex fingerprint of raw artifact bytes.
pub(crate) fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Fetches the artifact from a file path or HTTP(S) URL and gates swaps on
/// the fingerprint: [`ArtifactLoader::load_if_changed`] returns `None`
/// when the bytes at the source are unchanged.
pub struct ArtifactLoader {
    url: String,
    client: reqwest::Client,
}

impl ArtifactLoader {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn fetch_bytes(&self) -> anyhow::Result<Vec<u8>> {
        if let Some(rest) = self.url.strip_prefix("file://") {
            return tokio::fs::read(rest)
                .await
                .with_context(|| format!("reading artifact file {rest}"));
        }
        if self.url.starts_with("http://") || self.url.starts_with("https://") {
            let resp = self
                .client
                .get(&self.url)
                .send()
                .await
                .with_context(|| format!("fetching artifact from {}", self.url))?
                .error_for_status()
                .context("artifact endpoint returned error status")?;
            return Ok(resp.bytes().await?.to_vec());
        }
        // Bare path.
        tokio::fs::read(&self.url)
            .await
            .with_context(|| format!("reading artifact file {}", self.url))
    }

    /// Load, fingerprint, parse, and validate the artifact.
    pub async fn load(&self) -> anyhow::Result<Artifact> {
        let bytes = self.fetch_bytes().await?;
        let fp = fingerprint(&bytes);
        let mut artifact: Artifact =
            serde_json::from_slice(&bytes).context("parsing artifact JSON")?;
        artifact.fingerprint = fp;
        artifact.validate().context("validating artifact")?;
        debug!(
            version = %artifact.version,
            clusters = artifact.num_clusters(),
            "artifact loaded"
        );
        Ok(artifact)
    }

    /// Load only when the source bytes differ from `current_fingerprint`.
    ///
    /// Returns `Ok(None)` both when unchanged and when the source is
    /// unreachable — a failed reload is a soft condition (the previous
    /// artifact keeps serving) and is logged as a warning by the caller's
    /// refresh loop.
    pub async fn load_if_changed(
        &self,
        current_fingerprint: &str,
    ) -> anyhow::Result<Option<Artifact>> {
        let bytes = self.fetch_bytes().await?;
        let fp = fingerprint(&bytes);
        if fp == current_fingerprint {
            return Ok(None);
        }
        let mut artifact: Artifact =
            serde_json::from_slice(&bytes).context("parsing artifact JSON")?;
        artifact.fingerprint = fp;
        if let Err(e) = artifact.validate() {
            // A malformed artifact at the source must never displace a
            // working one.
            warn!(error = %e, "rejecting invalid artifact from source");
            return Err(e.into());
        }
        Ok(Some(artifact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_artifact_file(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    fn emergency_json() -> String {
        include_str!("../emergency.json").to_string()
    }

    #[tokio::test]
    async fn load_from_file_path() {
        let f = write_artifact_file(&emergency_json());
        let loader = ArtifactLoader::new(f.path().to_str().unwrap());
        let a = loader.load().await.unwrap();
        assert_eq!(a.version, "emergency-0");
        assert!(!a.fingerprint.is_empty());
    }

    #[tokio::test]
    async fn load_from_file_url() {
        let f = write_artifact_file(&emergency_json());
        let loader = ArtifactLoader::new(format!("file://{}", f.path().display()));
        assert!(loader.load().await.is_ok());
    }

    #[tokio::test]
    async fn load_if_changed_returns_none_for_same_bytes() {
        let f = write_artifact_file(&emergency_json());
        let loader = ArtifactLoader::new(f.path().to_str().unwrap());
        let a = loader.load().await.unwrap();
        let again = loader.load_if_changed(&a.fingerprint).await.unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn load_if_changed_detects_new_version() {
        let updated = emergency_json().replace("emergency-0", "emergency-1");
        let f = write_artifact_file(&updated);
        let loader = ArtifactLoader::new(f.path().to_str().unwrap());
        let a = loader
            .load_if_changed("0000000000000000")
            .await
            .unwrap()
            .expect("changed artifact must load");
        assert_eq!(a.version, "emergency-1");
    }

    #[tokio::test]
    async fn invalid_artifact_is_rejected() {
        let broken = emergency_json().replace("\"alpha\": 0.6", "\"alpha\": 7.0");
        let f = write_artifact_file(&broken);
        let loader = ArtifactLoader::new(f.path().to_str().unwrap());
        assert!(loader.load().await.is_err());
        assert!(loader.load_if_changed("x").await.is_err());
    }

    #[tokio::test]
    async fn missing_file_surfaces_error() {
        let loader = ArtifactLoader::new("/tmp/mimir_no_such_artifact.json");
        assert!(loader.load().await.is_err());
    }

    #[test]
    fn fingerprint_is_stable_and_content_addressed() {
        assert_eq!(fingerprint(b"abc"), fingerprint(b"abc"));
        assert_ne!(fingerprint(b"abc"), fingerprint(b"abd"));
    }
}
