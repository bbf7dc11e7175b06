use serde::{Deserialize, Serialize};

/// Provider kind a model is served by.
///
/// The router speaks four wire shapes; every model in the catalog belongs
/// to exactly one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    Openai,
    Gemini,
    Aggregator,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Openai => "openai",
            Self::Gemini => "gemini",
            Self::Aggregator => "aggregator",
        }
    }

    pub fn all() -> [ProviderKind; 4] {
        [Self::Anthropic, Self::Openai, Self::Gemini, Self::Aggregator]
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a model's reasoning depth is controlled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingKind {
    /// Discrete effort enum (`low` | `medium` | `high`).
    Effort,
    /// Integer token budget, clamped to [`ThinkingRanges`].
    Budget,
}

/// Per-model thinking budget bounds in tokens.
///
/// For effort-style models the fields describe the token-equivalent of
/// each effort level; for budget-style models they are the clamp points.
/// These ranges are authoritative — bucket defaults from config are
/// clamped against them at call time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThinkingRanges {
    pub low: u32,
    pub medium: u32,
    pub high: u32,
    pub max: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingParam {
    #[serde(rename = "type")]
    pub kind: ThinkingKind,
    pub ranges: ThinkingRanges,
}

impl ThinkingParam {
    /// Clamp a requested token budget to this model's declared ranges.
    pub fn clamp_budget(&self, requested: u32) -> u32 {
        requested.clamp(self.ranges.low, self.ranges.max)
    }
}

/// Price per million tokens, in USD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub in_per_million: f64,
    pub out_per_million: f64,
}

impl Pricing {
    /// Cost of one call in USD given observed token counts.
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 * self.in_per_million
            + completion_tokens as f64 * self.out_per_million)
            / 1_000_000.0
    }
}

/// Capability record for one model, as served by the catalog collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCapability {
    /// Catalog-wide unique identifier (e.g. "claude-opus-4-6",
    /// "deepseek/deepseek-r1").
    pub slug: String,
    pub provider: ProviderKind,
    /// Model family, used by the long-context guardrail (families
    /// advertising ≥ 1M input context are preferred there).
    pub family: String,
    /// Maximum input context in tokens.
    pub ctx_in_max: u64,
    /// Maximum output tokens per completion.
    pub ctx_out_max: u64,
    #[serde(default)]
    pub supports_json: bool,
    #[serde(default)]
    pub supports_tools: bool,
    #[serde(default)]
    pub thinking: Option<ThinkingParam>,
    pub pricing: Pricing,
    /// Model author as reported by the aggregator; used by the
    /// exclude-authors filter. Native-provider models leave this unset.
    #[serde(default)]
    pub author: Option<String>,
}

impl ModelCapability {
    /// Whether the request's input fits this model's context window.
    pub fn fits_context(&self, token_count: usize) -> bool {
        (token_count as u64) <= self.ctx_in_max
    }

    /// Whether this model's family advertises a long (≥ 1M token) input
    /// context.
    pub fn is_long_context(&self) -> bool {
        self.ctx_in_max >= 1_000_000
    }
}
