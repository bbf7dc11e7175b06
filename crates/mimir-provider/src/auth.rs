// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Auth adapters: detect, extract, and (for OAuth) refresh credentials.
//!
//! Adapters form a registry keyed by name. At request time exactly one
//! adapter's credentials are used for the selected provider: extracted
//! from the inbound headers when present, otherwise resolved from the
//! adapter's environment variable. A provider with neither yields
//! `AuthMissing`, and fallback is then restricted to providers that can
//! authenticate from the environment.

use std::sync::Arc;

use mimir_catalog::ProviderKind;

use crate::error::ProviderError;
use crate::oauth::PkceFlow;
use crate::types::RequestHeaders;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    Bearer,
    ApiKey,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub kind: CredentialKind,
    pub token: String,
    pub refresh_token: Option<String>,
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            kind: CredentialKind::Bearer,
            token: token.into(),
            refresh_token: None,
        }
    }

    pub fn api_key(token: impl Into<String>) -> Self {
        Self {
            kind: CredentialKind::ApiKey,
            token: token.into(),
            refresh_token: None,
        }
    }
}

pub trait AuthAdapter: Send + Sync {
    /// Registry name, matching `auth_adapters.enabled` entries.
    fn name(&self) -> &'static str;

    fn provider(&self) -> ProviderKind;

    /// Whether this adapter recognizes its credential shape in the
    /// inbound headers.
    fn matches(&self, headers: &RequestHeaders) -> bool;

    /// Extract credentials from the inbound headers.
    fn extract(&self, headers: &RequestHeaders) -> Option<Credentials>;

    /// Credentials from the process environment, for providers the router
    /// itself is credentialed for.
    fn env_credentials(&self) -> Option<Credentials>;

    /// The OAuth PKCE flow, for adapters that support one.
    fn oauth(&self) -> Option<&PkceFlow> {
        None
    }
}

// ── Anthropic ─────────────────────────────────────────────────────────────────

/// Anthropic-kind: `x-api-key` header, or an OAuth bearer whose shape
/// marks it as an Anthropic token (passed through verbatim).
pub struct AnthropicAuth;

impl AuthAdapter for AnthropicAuth {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn matches(&self, headers: &RequestHeaders) -> bool {
        headers.get("x-api-key").is_some()
            || headers
                .bearer()
                .is_some_and(|t| t.starts_with("sk-ant-"))
    }

    fn extract(&self, headers: &RequestHeaders) -> Option<Credentials> {
        if let Some(key) = headers.get("x-api-key") {
            return Some(Credentials::api_key(key));
        }
        let bearer = headers.bearer()?;
        bearer
            .starts_with("sk-ant-")
            .then(|| Credentials::bearer(bearer))
    }

    fn env_credentials(&self) -> Option<Credentials> {
        std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .map(Credentials::api_key)
    }
}

// ── OpenAI ────────────────────────────────────────────────────────────────────

/// OpenAI-kind: API key as bearer.
pub struct OpenaiAuth;

impl AuthAdapter for OpenaiAuth {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Openai
    }

    fn matches(&self, headers: &RequestHeaders) -> bool {
        headers
            .bearer()
            .is_some_and(|t| t.starts_with("sk-") && !t.starts_with("sk-ant-") && !t.starts_with("sk-or-"))
    }

    fn extract(&self, headers: &RequestHeaders) -> Option<Credentials> {
        let bearer = headers.bearer()?;
        (bearer.starts_with("sk-") && !bearer.starts_with("sk-ant-") && !bearer.starts_with("sk-or-"))
            .then(|| Credentials::bearer(bearer))
    }

    fn env_credentials(&self) -> Option<Credentials> {
        std::env::var("OPENAI_API_KEY").ok().map(Credentials::bearer)
    }
}

// ── Gemini ────────────────────────────────────────────────────────────────────

/// Gemini-kind: API key via `x-goog-api-key` (forwarded as a query
/// parameter by the driver), or an OAuth bearer obtained via PKCE.
pub struct GeminiAuth {
    oauth: PkceFlow,
}

impl GeminiAuth {
    pub fn new() -> Self {
        Self {
            oauth: PkceFlow::new(
                "https://accounts.google.com/o/oauth2/v2/auth",
                "https://oauth2.googleapis.com/token",
                std::env::var("GEMINI_OAUTH_CLIENT_ID").unwrap_or_default(),
                "http://localhost:8787/oauth/callback",
            ),
        }
    }
}

impl Default for GeminiAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthAdapter for GeminiAuth {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn matches(&self, headers: &RequestHeaders) -> bool {
        headers.get("x-goog-api-key").is_some()
            || headers.bearer().is_some_and(|t| t.starts_with("ya29."))
    }

    fn extract(&self, headers: &RequestHeaders) -> Option<Credentials> {
        if let Some(key) = headers.get("x-goog-api-key") {
            return Some(Credentials::api_key(key));
        }
        let bearer = headers.bearer()?;
        if !bearer.starts_with("ya29.") {
            return None;
        }
        Some(Credentials {
            kind: CredentialKind::Bearer,
            token: bearer.to_string(),
            refresh_token: headers.get("x-goog-refresh-token").map(str::to_string),
        })
    }

    fn env_credentials(&self) -> Option<Credentials> {
        std::env::var("GEMINI_API_KEY").ok().map(Credentials::api_key)
    }

    fn oauth(&self) -> Option<&PkceFlow> {
        Some(&self.oauth)
    }
}

// ── Aggregator ────────────────────────────────────────────────────────────────

/// Aggregator-kind: API key as bearer (`sk-or-…`).
pub struct AggregatorAuth;

impl AuthAdapter for AggregatorAuth {
    fn name(&self) -> &'static str {
        "aggregator"
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Aggregator
    }

    fn matches(&self, headers: &RequestHeaders) -> bool {
        headers.bearer().is_some_and(|t| t.starts_with("sk-or-"))
    }

    fn extract(&self, headers: &RequestHeaders) -> Option<Credentials> {
        let bearer = headers.bearer()?;
        bearer
            .starts_with("sk-or-")
            .then(|| Credentials::bearer(bearer))
    }

    fn env_credentials(&self) -> Option<Credentials> {
        std::env::var("AGGREGATOR_API_KEY")
            .ok()
            .map(Credentials::bearer)
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

pub struct AuthRegistry {
    adapters: Vec<Arc<dyn AuthAdapter>>,
}

impl AuthRegistry {
    /// Build the registry from the enabled adapter names, preserving
    /// order. Unknown names are skipped with a warning.
    pub fn from_enabled(enabled: &[String]) -> Self {
        let mut adapters: Vec<Arc<dyn AuthAdapter>> = Vec::new();
        for name in enabled {
            match name.as_str() {
                "anthropic" => adapters.push(Arc::new(AnthropicAuth)),
                "openai" => adapters.push(Arc::new(OpenaiAuth)),
                "gemini" => adapters.push(Arc::new(GeminiAuth::new())),
                "aggregator" => adapters.push(Arc::new(AggregatorAuth)),
                other => tracing::warn!(adapter = other, "unknown auth adapter, skipping"),
            }
        }
        Self { adapters }
    }

    /// First adapter whose credential shape appears in the headers —
    /// request-auth detection at pipeline entry.
    pub fn detect(&self, headers: &RequestHeaders) -> Option<&dyn AuthAdapter> {
        self.adapters
            .iter()
            .find(|a| a.matches(headers))
            .map(|a| a.as_ref())
    }

    pub fn adapter_for(&self, kind: ProviderKind) -> Option<&dyn AuthAdapter> {
        self.adapters
            .iter()
            .find(|a| a.provider() == kind)
            .map(|a| a.as_ref())
    }

    /// Resolve credentials for the selected provider: inbound headers
    /// first, environment second.
    pub fn resolve(
        &self,
        kind: ProviderKind,
        headers: &RequestHeaders,
    ) -> Result<Credentials, ProviderError> {
        let adapter = self
            .adapter_for(kind)
            .ok_or_else(|| ProviderError::auth_missing(kind))?;
        adapter
            .extract(headers)
            .or_else(|| adapter.env_credentials())
            .ok_or_else(|| ProviderError::auth_missing(kind))
    }

    /// Whether `kind` can authenticate without inbound credentials —
    /// the condition for it to remain a fallback target after
    /// `AuthMissing`.
    pub fn env_credentialed(&self, kind: ProviderKind) -> bool {
        self.adapter_for(kind)
            .and_then(|a| a.env_credentials())
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> AuthRegistry {
        AuthRegistry::from_enabled(&[
            "anthropic".into(),
            "openai".into(),
            "gemini".into(),
            "aggregator".into(),
        ])
    }

    fn headers(pairs: &[(&str, &str)]) -> RequestHeaders {
        RequestHeaders::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn x_api_key_detects_anthropic() {
        let r = registry();
        let h = headers(&[("x-api-key", "whatever")]);
        assert_eq!(r.detect(&h).unwrap().name(), "anthropic");
    }

    #[test]
    fn sk_ant_bearer_detects_anthropic() {
        let r = registry();
        let h = headers(&[("authorization", "Bearer sk-ant-abc123")]);
        assert_eq!(r.detect(&h).unwrap().name(), "anthropic");
    }

    #[test]
    fn plain_sk_bearer_detects_openai() {
        let r = registry();
        let h = headers(&[("authorization", "Bearer sk-proj-abc")]);
        assert_eq!(r.detect(&h).unwrap().name(), "openai");
    }

    #[test]
    fn sk_or_bearer_detects_aggregator() {
        let r = registry();
        let h = headers(&[("authorization", "Bearer sk-or-v1-abc")]);
        assert_eq!(r.detect(&h).unwrap().name(), "aggregator");
    }

    #[test]
    fn goog_key_detects_gemini() {
        let r = registry();
        let h = headers(&[("x-goog-api-key", "AIza-abc")]);
        let a = r.detect(&h).unwrap();
        assert_eq!(a.name(), "gemini");
        assert!(a.oauth().is_some(), "gemini adapter carries a PKCE flow");
    }

    #[test]
    fn ya29_bearer_is_gemini_oauth_with_refresh() {
        let r = registry();
        let h = headers(&[
            ("authorization", "Bearer ya29.token"),
            ("x-goog-refresh-token", "1//refresh"),
        ]);
        let creds = r.resolve(ProviderKind::Gemini, &h).unwrap();
        assert_eq!(creds.kind, CredentialKind::Bearer);
        assert_eq!(creds.refresh_token.as_deref(), Some("1//refresh"));
    }

    #[test]
    fn no_credentials_detects_nothing() {
        let r = registry();
        assert!(r.detect(&headers(&[])).is_none());
    }

    #[test]
    fn resolve_prefers_headers_over_env() {
        let r = registry();
        let h = headers(&[("x-api-key", "from-header")]);
        let creds = r.resolve(ProviderKind::Anthropic, &h).unwrap();
        assert_eq!(creds.token, "from-header");
        assert_eq!(creds.kind, CredentialKind::ApiKey);
    }

    #[test]
    fn resolve_without_credentials_is_auth_missing() {
        let r = AuthRegistry::from_enabled(&["openai".into()]);
        let err = r
            .resolve(ProviderKind::Openai, &headers(&[("authorization", "Bearer nope")]))
            .err();
        // `nope` does not look like an OpenAI key and OPENAI_API_KEY may be
        // unset; when set in the test environment the env fallback applies.
        if std::env::var("OPENAI_API_KEY").is_err() {
            assert_eq!(err.unwrap().kind, crate::error::ErrorKind::AuthMissing);
        }
    }

    #[test]
    fn disabled_adapter_is_not_consulted() {
        let r = AuthRegistry::from_enabled(&["openai".into()]);
        let h = headers(&[("x-api-key", "anthropic-key")]);
        assert!(r.detect(&h).is_none());
        assert!(r.adapter_for(ProviderKind::Anthropic).is_none());
    }

    #[test]
    fn unknown_adapter_names_are_skipped() {
        let r = AuthRegistry::from_enabled(&["nonexistent".into(), "openai".into()]);
        assert!(r.adapter_for(ProviderKind::Openai).is_some());
    }
}
