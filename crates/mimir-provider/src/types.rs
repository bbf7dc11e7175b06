use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use mimir_catalog::ProviderKind;

/// A single message in the inbound chat payload.
///
/// `content` stays an opaque JSON value (string or structured parts); the
/// router reads text out of it for feature extraction but forwards it to
/// providers without translation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: serde_json::Value,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: serde_json::Value::String(content.into()),
        }
    }

    /// Plain text of this message; structured parts contribute their
    /// `text` fields.
    pub fn text(&self) -> String {
        match &self.content {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Array(parts) => parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            _ => String::new(),
        }
    }
}

/// The inbound chat-completion request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Requested model; `"auto"` (or absence) delegates the choice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    /// True when the caller delegates model choice to the router.
    pub fn is_auto(&self) -> bool {
        match self.model.as_deref() {
            None | Some("") | Some("auto") => true,
            _ => false,
        }
    }

    /// Message contents concatenated in order, for feature extraction.
    pub fn concatenated_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Token usage reported by the upstream provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// A successful upstream response.
///
/// `body` is the provider's JSON verbatim — the router never rewrites
/// response schemas.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderResponse {
    pub provider: ProviderKind,
    pub model: String,
    pub body: serde_json::Value,
    pub usage: Usage,
}

/// Requested thinking depth, already clamped to the model's catalog
/// ranges by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Thinking {
    Effort(String),
    Budget(u32),
}

/// Everything a driver needs for one upstream call.
#[derive(Debug, Clone)]
pub struct CallParams {
    pub model: String,
    pub thinking: Option<Thinking>,
    pub max_tokens: Option<u32>,
    /// Aggregator routing preferences; ignored by native drivers.
    pub provider_prefs: Option<mimir_config::AggregatorProviderPrefs>,
    /// Total deadline for this call.
    pub deadline: Duration,
}

impl CallParams {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            thinking: None,
            max_tokens: None,
            provider_prefs: None,
            deadline: Duration::from_secs(120),
        }
    }
}

/// Case-insensitive view of the inbound request headers.
///
/// Built once per request at the HTTP boundary; auth adapters match and
/// extract against it without touching the framework's header types.
#[derive(Debug, Clone, Default)]
pub struct RequestHeaders(HashMap<String, String>);

impl RequestHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
                .collect(),
        )
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// The bearer token from `Authorization`, if present.
    pub fn bearer(&self) -> Option<&str> {
        self.get("authorization")?.strip_prefix("Bearer ")
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }
}
