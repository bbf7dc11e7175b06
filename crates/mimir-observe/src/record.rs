use chrono::{DateTime, Utc};
use serde::Serialize;

use mimir_catalog::ProviderKind;
use mimir_triage::Bucket;

/// One decision + execution, as emitted by the engine after the request
/// finishes (completion order, not arrival order).
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    /// Absent for requests denied before triage ran.
    pub bucket: Option<Bucket>,
    pub provider: Option<ProviderKind>,
    pub model: Option<String>,
    pub success: bool,
    pub latency_ms: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Catalog pricing × observed tokens, USD.
    pub cost_usd: f64,
    pub fallback_used: bool,
    pub fallback_reason: Option<String>,
    /// The primary failed with an anthropic-kind 429.
    pub anthropic_429: bool,
    /// Features were produced with the deterministic embedding.
    pub embedding_fallback: bool,
    /// Deny reason for policy short-circuits.
    pub denied: Option<String>,
    /// Externally supplied win-rate-vs-baseline signal.
    pub win_vs_baseline: Option<bool>,
    pub artifact_version: String,
}

impl DecisionRecord {
    /// A blank record for `request_id`; the engine fills in outcome fields.
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            timestamp: Utc::now(),
            bucket: None,
            provider: None,
            model: None,
            success: false,
            latency_ms: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            cost_usd: 0.0,
            fallback_used: false,
            fallback_reason: None,
            anthropic_429: false,
            embedding_fallback: false,
            denied: None,
            win_vs_baseline: None,
            artifact_version: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_defaults_to_failure() {
        let r = DecisionRecord::new("req-1");
        assert!(!r.success);
        assert!(!r.fallback_used);
        assert!(r.denied.is_none());
    }

    #[test]
    fn record_serializes_bucket_lowercase() {
        let mut r = DecisionRecord::new("req-1");
        r.bucket = Some(Bucket::Hard);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["bucket"], "hard");
        assert_eq!(json["request_id"], "req-1");
    }
}
