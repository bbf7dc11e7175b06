// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use mimir_provider::ProviderError;

/// Errors surfaced to the caller. Recoverable conditions (embedding
/// outages, artifact staleness, retryable provider failures) are handled
/// inside the pipeline and never appear here.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// The requested model is outside every candidate list.
    #[error("requested model {0:?} is not routable")]
    UnknownModel(String),

    /// No candidate survived filtering for the chosen bucket.
    #[error("no routable candidates for bucket {0}")]
    NoCandidates(String),

    /// The upstream call failed and no fallback could recover it. The
    /// provider's error is carried verbatim.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl RouteError {
    /// Whether the host may try its own fallbacks after this error.
    ///
    /// Policy denies and auth failures must not be retried at the host
    /// level; the router already exhausted every permitted path.
    pub fn allow_host_fallback(&self) -> bool {
        match self {
            Self::UnknownModel(_) | Self::NoCandidates(_) => false,
            Self::Provider(e) => e.retryable(),
        }
    }

    /// Stable machine-readable code for deny short-circuits and records.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownModel(_) => "unknown_model",
            Self::NoCandidates(_) => "no_candidates",
            Self::Provider(e) => match e.kind {
                mimir_provider::ErrorKind::AuthMissing => "auth_missing",
                mimir_provider::ErrorKind::AuthInvalid => "auth_invalid",
                mimir_provider::ErrorKind::RateLimit => "rate_limit",
                mimir_provider::ErrorKind::Timeout => "timeout",
                mimir_provider::ErrorKind::ContentFilter => "content_filter",
                mimir_provider::ErrorKind::ContextOverflow => "context_overflow",
                mimir_provider::ErrorKind::Transient => "provider_transient",
                mimir_provider::ErrorKind::Permanent => "provider_permanent",
            },
        }
    }
}
