// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so a named function is required for opt-out flags.
fn default_true() -> bool {
    true
}

/// Top-level configuration.
///
/// The recognized option surface is fixed: unknown keys are rejected at
/// parse time rather than silently ignored, so a typo in a config file
/// fails loudly instead of routing with defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub auth_adapters: AuthAdaptersConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub tuning: TuningConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

// ── Router ────────────────────────────────────────────────────────────────────

/// Quality-vs-cost weighting, bucket thresholds, and candidate lists.
///
/// `alpha`, `thresholds`, and `penalties` here are *overrides*: when unset
/// the values shipped in the tuning artifact are used. Candidate lists are
/// always config-owned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterConfig {
    /// Quality-vs-cost scalar in [0,1]. 1.0 = pure quality.
    /// `None` defers to the artifact value.
    pub alpha: Option<f32>,
    #[serde(default)]
    pub thresholds: ThresholdOverrides,
    /// Candidate breadth: the primary plus up to `top_p` fallbacks.
    #[serde(default = "default_top_p")]
    pub top_p: usize,
    #[serde(default)]
    pub penalties: PenaltyOverrides,
    #[serde(default)]
    pub bucket_defaults: BucketDefaults,
    /// Ordered model slugs considered for the cheap bucket.
    #[serde(default = "default_cheap_candidates")]
    pub cheap_candidates: Vec<String>,
    /// Ordered model slugs considered for the mid bucket.
    #[serde(default = "default_mid_candidates")]
    pub mid_candidates: Vec<String>,
    /// Ordered model slugs considered for the hard bucket.
    #[serde(default = "default_hard_candidates")]
    pub hard_candidates: Vec<String>,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    /// What to do when the request names a model outside every candidate
    /// list: `deny` (surface a non-retryable error) or `auto` (rewrite the
    /// request to delegated routing).
    #[serde(default)]
    pub unknown_model: UnknownModelPolicy,
}

fn default_top_p() -> usize {
    3
}

fn default_cheap_candidates() -> Vec<String> {
    vec![
        "deepseek/deepseek-r1".into(),
        "qwen/qwen-2.5-72b-instruct".into(),
        "gemini-2.5-flash".into(),
    ]
}

fn default_mid_candidates() -> Vec<String> {
    vec![
        "claude-sonnet-4".into(),
        "gpt-5-mini".into(),
        "gemini-2.5-pro".into(),
    ]
}

fn default_hard_candidates() -> Vec<String> {
    vec![
        "claude-opus-4-6".into(),
        "gpt-5.2".into(),
        "gemini-3-pro".into(),
    ]
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            alpha: None,
            thresholds: ThresholdOverrides::default(),
            top_p: default_top_p(),
            penalties: PenaltyOverrides::default(),
            bucket_defaults: BucketDefaults::default(),
            cheap_candidates: default_cheap_candidates(),
            mid_candidates: default_mid_candidates(),
            hard_candidates: default_hard_candidates(),
            aggregator: AggregatorConfig::default(),
            unknown_model: UnknownModelPolicy::default(),
        }
    }
}

/// Bucket probability thresholds. `None` fields defer to the artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdOverrides {
    pub cheap: Option<f32>,
    pub hard: Option<f32>,
}

/// Penalty scalars applied by the selector. `None` defers to the artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PenaltyOverrides {
    pub latency_sd: Option<f32>,
    pub ctx_over_80pct: Option<f32>,
}

/// Per-bucket thinking defaults. The cheap bucket never requests thinking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BucketDefaults {
    #[serde(default = "default_mid_thinking")]
    pub mid: ThinkingDefault,
    #[serde(default = "default_hard_thinking")]
    pub hard: ThinkingDefault,
}

impl Default for BucketDefaults {
    fn default() -> Self {
        Self {
            mid: default_mid_thinking(),
            hard: default_hard_thinking(),
        }
    }
}

fn default_mid_thinking() -> ThinkingDefault {
    ThinkingDefault {
        effort: Some("medium".into()),
        budget: Some(8_000),
    }
}

fn default_hard_thinking() -> ThinkingDefault {
    ThinkingDefault {
        effort: Some("high".into()),
        budget: Some(20_000),
    }
}

/// Requested thinking depth for one bucket.
///
/// `effort` applies to effort-style models (`low` | `medium` | `high`),
/// `budget` to budget-style models (token count). The executing driver
/// clamps both to the ranges the catalog declares for the chosen model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThinkingDefault {
    pub effort: Option<String>,
    pub budget: Option<u32>,
}

/// Meta-aggregator provider preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregatorConfig {
    /// Model authors excluded from aggregator candidates. Models from these
    /// authors are reachable through their native provider only.
    #[serde(default = "default_exclude_authors")]
    pub exclude_authors: Vec<String>,
    #[serde(default)]
    pub provider: AggregatorProviderPrefs,
}

fn default_exclude_authors() -> Vec<String> {
    vec!["anthropic".into()]
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            exclude_authors: default_exclude_authors(),
            provider: AggregatorProviderPrefs::default(),
        }
    }
}

/// Routing preferences forwarded verbatim in the aggregator request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregatorProviderPrefs {
    /// Upstream sort order: "price" | "throughput" | "latency".
    #[serde(default = "default_sort")]
    pub sort: String,
    /// Maximum acceptable price per million output tokens.
    pub max_price: Option<f64>,
    /// Whether the aggregator may fall back across its own upstreams.
    #[serde(default = "default_true")]
    pub allow_fallbacks: bool,
}

fn default_sort() -> String {
    "price".into()
}

impl Default for AggregatorProviderPrefs {
    fn default() -> Self {
        Self {
            sort: default_sort(),
            max_price: None,
            allow_fallbacks: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownModelPolicy {
    /// Surface a non-retryable error; host-level fallbacks are disallowed.
    #[default]
    Deny,
    /// Rewrite the request to `"auto"` and route normally.
    Auto,
}

// ── Auth adapters ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthAdaptersConfig {
    /// Adapter names consulted in order at request time.
    #[serde(default = "default_adapters")]
    pub enabled: Vec<String>,
}

fn default_adapters() -> Vec<String> {
    vec![
        "anthropic".into(),
        "openai".into(),
        "gemini".into(),
        "aggregator".into(),
    ]
}

impl Default for AuthAdaptersConfig {
    fn default() -> Self {
        Self {
            enabled: default_adapters(),
        }
    }
}

// ── Collaborators ─────────────────────────────────────────────────────────────

/// Model catalog collaborator (read-only HTTP API).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_url")]
    pub base_url: String,
    /// Snapshot refresh interval. Responses are cached for this long and
    /// the previous snapshot is served while the catalog is unreachable.
    #[serde(default = "default_catalog_refresh")]
    pub refresh_seconds: u64,
}

fn default_catalog_url() -> String {
    "http://127.0.0.1:8640".into()
}

fn default_catalog_refresh() -> u64 {
    300
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_catalog_url(),
            refresh_seconds: default_catalog_refresh(),
        }
    }
}

/// Tuning artifact source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TuningConfig {
    /// `file://` path or HTTP(S) URL returning the artifact JSON.
    /// Empty string = run on the embedded emergency artifact only.
    #[serde(default)]
    pub artifact_url: String,
    #[serde(default = "default_artifact_reload")]
    pub reload_seconds: u64,
}

fn default_artifact_reload() -> u64 {
    300
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            artifact_url: String::new(),
            reload_seconds: default_artifact_reload(),
        }
    }
}

// ── Observability ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObservabilityConfig {
    /// Port for the stats/SLO endpoint. 0 disables the dashboard listener
    /// (stats remain available on the main server's `/stats`).
    #[serde(default)]
    pub dashboard_port: u16,
    #[serde(default)]
    pub slo: SloConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            dashboard_port: 0,
            slo: SloConfig::default(),
            alerts: AlertsConfig::default(),
        }
    }
}

/// Deployment gate limits. `p95_ms`, `max_misfire_rate`, and
/// `min_uptime_pct` are blocking; the rest are warnings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SloConfig {
    #[serde(default = "default_p95_ms")]
    pub p95_ms: u64,
    #[serde(default = "default_misfire")]
    pub max_misfire_rate: f64,
    #[serde(default = "default_uptime")]
    pub min_uptime_pct: f64,
    pub max_cost_per_task: Option<f64>,
    pub min_win_rate: Option<f64>,
}

fn default_p95_ms() -> u64 {
    2_500
}

fn default_misfire() -> f64 {
    0.05
}

fn default_uptime() -> f64 {
    99.5
}

impl Default for SloConfig {
    fn default() -> Self {
        Self {
            p95_ms: default_p95_ms(),
            max_misfire_rate: default_misfire(),
            min_uptime_pct: default_uptime(),
            max_cost_per_task: None,
            min_win_rate: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlertsConfig {
    pub webhook_url: Option<String>,
}

// ── Server ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen_addr: String,
}

fn default_listen() -> String {
    "127.0.0.1:8787".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen(),
        }
    }
}

// ── Feature extraction ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeaturesConfig {
    /// Extraction latency budget in milliseconds. On expiry the extractor
    /// degrades (hash embedding, default lexical values) instead of failing.
    #[serde(default = "default_budget_ms")]
    pub budget_ms: u64,
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
    /// Primary remote embedding endpoint. `None` = deterministic fallback only.
    pub embedding_url: Option<String>,
    /// Secondary endpoint tried when the primary fails within budget.
    pub embedding_fallback_url: Option<String>,
    #[serde(default = "default_cache_entries")]
    pub cache_entries: usize,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
    /// Input-token count above which the hard bucket and a large-context
    /// model family are forced.
    #[serde(default = "default_long_context")]
    pub long_context_trigger: usize,
}

fn default_budget_ms() -> u64 {
    25
}

fn default_embedding_dim() -> usize {
    384
}

fn default_cache_entries() -> usize {
    12_288
}

fn default_cache_ttl() -> u64 {
    86_400
}

fn default_long_context() -> usize {
    200_000
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            budget_ms: default_budget_ms(),
            embedding_dim: default_embedding_dim(),
            embedding_url: None,
            embedding_fallback_url: None,
            cache_entries: default_cache_entries(),
            cache_ttl_seconds: default_cache_ttl(),
            long_context_trigger: default_long_context(),
        }
    }
}

impl Config {
    /// Candidate list for a bucket name. Panics only on a programming error
    /// (callers pass one of the three fixed bucket names).
    pub fn candidates_for(&self, bucket: &str) -> &[String] {
        match bucket {
            "cheap" => &self.router.cheap_candidates,
            "mid" => &self.router.mid_candidates,
            "hard" => &self.router.hard_candidates,
            other => unreachable!("unknown bucket name: {other}"),
        }
    }
}
