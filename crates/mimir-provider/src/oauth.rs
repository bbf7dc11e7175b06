// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! OAuth 2.0 authorization-code flow with PKCE (S256).
//!
//! Used by adapters whose provider accepts OAuth bearer tokens. Refresh
//! is single-flight per refresh token: concurrent callers await the same
//! in-flight exchange and share its result.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use crate::auth::{CredentialKind, Credentials};

const VERIFIER_CHARS: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";
const VERIFIER_LEN: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum OauthError {
    #[error("token endpoint request failed: {0}")]
    Network(String),
    #[error("token endpoint returned status {0}: {1}")]
    Status(u16, String),
    #[error("token response malformed: {0}")]
    BadResponse(String),
}

/// Generate a PKCE code verifier (RFC 7636 §4.1).
pub fn generate_verifier() -> String {
    let mut rng = rand::thread_rng();
    (0..VERIFIER_LEN)
        .map(|_| VERIFIER_CHARS[rng.gen_range(0..VERIFIER_CHARS.len())] as char)
        .collect()
}

/// S256 code challenge: base64url(sha256(verifier)), unpadded.
pub fn challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// One provider's PKCE endpoints plus the single-flight refresh state.
pub struct PkceFlow {
    authorize_url: String,
    token_url: String,
    client_id: String,
    redirect_uri: String,
    client: reqwest::Client,
    in_flight: Mutex<HashMap<String, Arc<OnceCell<Credentials>>>>,
}

impl PkceFlow {
    pub fn new(
        authorize_url: impl Into<String>,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            authorize_url: authorize_url.into(),
            token_url: token_url.into(),
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            client: reqwest::Client::new(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Build the authorization URL for `state` and a fresh verifier.
    ///
    /// Returns `(authorize_url, verifier)`; the caller must hold the
    /// verifier for the matching [`exchange`][Self::exchange].
    pub fn initiate(&self, state: &str) -> (String, String) {
        let verifier = generate_verifier();
        let url = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&state={}&code_challenge={}&code_challenge_method=S256",
            self.authorize_url,
            urlencode(&self.client_id),
            urlencode(&self.redirect_uri),
            urlencode(state),
            challenge(&verifier),
        );
        (url, verifier)
    }

    /// Exchange an authorization code for credentials.
    pub async fn exchange(&self, code: &str, verifier: &str) -> Result<Credentials, OauthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", verifier),
            ("client_id", &self.client_id),
            ("redirect_uri", &self.redirect_uri),
        ];
        self.token_request(&params).await
    }

    /// Refresh an access token, single-flight per refresh token.
    ///
    /// The first caller performs the exchange; concurrent callers await
    /// it and reuse the result. On failure the slot is cleared so the
    /// next caller retries.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Credentials, OauthError> {
        let cell = {
            let mut map = self.in_flight.lock().await;
            map.entry(refresh_token.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = cell
            .get_or_try_init(|| async {
                debug!("refreshing oauth access token");
                let params = [
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                    ("client_id", &self.client_id),
                ];
                self.token_request(&params).await
            })
            .await
            .map(|c| c.clone());

        // The exchange is done (either way); later refreshes start fresh.
        self.in_flight.lock().await.remove(refresh_token);
        result
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<Credentials, OauthError> {
        let resp = self
            .client
            .post(&self.token_url)
            .form(params)
            .send()
            .await
            .map_err(|e| OauthError::Network(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(OauthError::Status(status.as_u16(), body));
        }
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| OauthError::BadResponse(e.to_string()))?;
        Ok(Credentials {
            kind: CredentialKind::Bearer,
            token: token.access_token,
            refresh_token: token.refresh_token,
        })
    }
}

fn urlencode(s: &str) -> String {
    // Reserved characters per RFC 3986; everything else passes through.
    s.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{b:02X}"),
        })
        .collect()
}
