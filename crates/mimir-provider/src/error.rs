// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Typed provider errors.
//!
//! Everything the fallback protocol needs to decide its next move lives
//! on the error: the kind, the HTTP status, whether a retry can help,
//! and whether the failure was a rate limit.

use mimir_catalog::ProviderKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No credentials for the selected provider.
    AuthMissing,
    /// Credentials rejected (401/403).
    AuthInvalid,
    /// HTTP 429.
    RateLimit,
    /// 5xx, connection failure, or malformed response.
    Transient,
    /// Deadline exceeded.
    Timeout,
    /// Non-retryable 4xx.
    Permanent,
    /// Upstream content policy rejection.
    ContentFilter,
    /// Input exceeds the model's context window.
    ContextOverflow,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?} from {provider}: {message}")]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub provider: ProviderKind,
    pub status: Option<u16>,
    pub message: String,
    /// Retry hint from the upstream, in seconds.
    pub retry_after: Option<u64>,
}

impl ProviderError {
    pub fn new(kind: ErrorKind, provider: ProviderKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            provider,
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Classify an upstream HTTP status.
    pub fn from_status(
        provider: ProviderKind,
        status: u16,
        body: &str,
        retry_after: Option<u64>,
    ) -> Self {
        let kind = match status {
            401 | 403 => ErrorKind::AuthInvalid,
            429 => ErrorKind::RateLimit,
            413 => ErrorKind::ContextOverflow,
            400..=499 => {
                let lower = body.to_ascii_lowercase();
                if lower.contains("content_filter")
                    || lower.contains("content policy")
                    || lower.contains("safety")
                {
                    ErrorKind::ContentFilter
                } else if lower.contains("context_length") || lower.contains("context window") {
                    ErrorKind::ContextOverflow
                } else {
                    ErrorKind::Permanent
                }
            }
            _ => ErrorKind::Transient,
        };
        Self {
            kind,
            provider,
            status: Some(status),
            message: truncate(body, 512),
            retry_after,
        }
    }

    pub fn timeout(provider: ProviderKind) -> Self {
        Self::new(ErrorKind::Timeout, provider, "deadline exceeded")
    }

    pub fn network(provider: ProviderKind, err: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::Transient, provider, err.to_string())
    }

    pub fn auth_missing(provider: ProviderKind) -> Self {
        Self::new(
            ErrorKind::AuthMissing,
            provider,
            "no credentials available for provider",
        )
    }

    /// Whether trying another candidate can help.
    pub fn retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::RateLimit | ErrorKind::Transient | ErrorKind::Timeout
        )
    }

    pub fn is_rate_limit(&self) -> bool {
        self.kind == ErrorKind::RateLimit
    }

    /// Rate limit from the anthropic-kind provider: the trigger for the
    /// immediate non-anthropic reroute and the per-user cool-down.
    pub fn is_anthropic_rate_limit(&self) -> bool {
        self.is_rate_limit() && self.provider == ProviderKind::Anthropic
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_401_is_auth_invalid_and_final() {
        let e = ProviderError::from_status(ProviderKind::Openai, 401, "bad key", None);
        assert_eq!(e.kind, ErrorKind::AuthInvalid);
        assert!(!e.retryable());
    }

    #[test]
    fn status_429_is_retryable_rate_limit() {
        let e = ProviderError::from_status(ProviderKind::Anthropic, 429, "slow down", Some(30));
        assert!(e.is_rate_limit());
        assert!(e.retryable());
        assert_eq!(e.retry_after, Some(30));
    }

    #[test]
    fn anthropic_429_is_flagged_for_reroute() {
        let e = ProviderError::from_status(ProviderKind::Anthropic, 429, "", None);
        assert!(e.is_anthropic_rate_limit());
        let e2 = ProviderError::from_status(ProviderKind::Gemini, 429, "", None);
        assert!(!e2.is_anthropic_rate_limit());
    }

    #[test]
    fn status_500_is_retryable_transient() {
        let e = ProviderError::from_status(ProviderKind::Gemini, 500, "oops", None);
        assert_eq!(e.kind, ErrorKind::Transient);
        assert!(e.retryable());
    }

    #[test]
    fn content_filter_body_is_detected() {
        let e = ProviderError::from_status(
            ProviderKind::Openai,
            400,
            r#"{"error":{"code":"content_filter"}}"#,
            None,
        );
        assert_eq!(e.kind, ErrorKind::ContentFilter);
        assert!(!e.retryable());
    }

    #[test]
    fn context_length_body_is_overflow() {
        let e = ProviderError::from_status(
            ProviderKind::Openai,
            400,
            "maximum context_length exceeded",
            None,
        );
        assert_eq!(e.kind, ErrorKind::ContextOverflow);
    }

    #[test]
    fn plain_400_is_permanent() {
        let e = ProviderError::from_status(ProviderKind::Aggregator, 400, "malformed", None);
        assert_eq!(e.kind, ErrorKind::Permanent);
        assert!(!e.retryable());
    }

    #[test]
    fn timeout_is_retryable() {
        assert!(ProviderError::timeout(ProviderKind::Openai).retryable());
    }

    #[test]
    fn long_body_is_truncated() {
        let e = ProviderError::from_status(ProviderKind::Openai, 500, &"x".repeat(2_000), None);
        assert!(e.message.len() <= 512);
    }
}
