// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Gemini-kind driver — Generative Language API.
//!
//! # Auth
//! API key as a query parameter, or OAuth bearer (PKCE-obtained) on the
//! `Authorization` header.
//!
//! # Thinking
//! Budget-style: `generationConfig.thinkingConfig.thinkingBudget`.
//!
//! # Endpoint pattern
//! `POST {base}/v1beta/models/{model}:generateContent`

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use mimir_catalog::ProviderKind;

use crate::auth::{CredentialKind, Credentials};
use crate::driver::{error_from_response, send_with_deadline, ProviderDriver};
use crate::error::ProviderError;
use crate::types::{CallParams, ChatRequest, ProviderResponse, Thinking, Usage};

pub struct GeminiDriver {
    base_url: String,
    client: reqwest::Client,
}

impl GeminiDriver {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".into()),
            client: reqwest::Client::new(),
        }
    }
}

/// Build the generateContent body. System messages become the
/// `systemInstruction`; assistant turns map to role `model`.
pub(crate) fn build_body(req: &ChatRequest, params: &CallParams) -> Value {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();
    for m in &req.messages {
        match m.role.as_str() {
            "system" => system_parts.push(json!({ "text": m.text() })),
            "assistant" => {
                contents.push(json!({ "role": "model", "parts": [{ "text": m.text() }] }))
            }
            _ => contents.push(json!({ "role": "user", "parts": [{ "text": m.text() }] })),
        }
    }

    let mut generation_config = json!({});
    if let Some(t) = req.temperature {
        generation_config["temperature"] = json!(t);
    }
    if let Some(max) = params.max_tokens.or(req.max_tokens) {
        generation_config["maxOutputTokens"] = json!(max);
    }
    if let Some(Thinking::Budget(budget)) = &params.thinking {
        generation_config["thinkingConfig"] = json!({ "thinkingBudget": budget });
    }

    let mut body = json!({
        "contents": contents,
        "generationConfig": generation_config,
    });
    if !system_parts.is_empty() {
        body["systemInstruction"] = json!({ "parts": system_parts });
    }
    body
}

fn parse_usage(body: &Value) -> Usage {
    Usage {
        prompt_tokens: body["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0),
        completion_tokens: body["usageMetadata"]["candidatesTokenCount"]
            .as_u64()
            .unwrap_or(0),
    }
}

#[async_trait]
impl ProviderDriver for GeminiDriver {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    async fn chat(
        &self,
        req: &ChatRequest,
        params: &CallParams,
        creds: &Credentials,
    ) -> Result<ProviderResponse, ProviderError> {
        let body = build_body(req, params);
        debug!(model = %params.model, "sending gemini request");

        let mut url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            params.model
        );
        let mut builder = match creds.kind {
            CredentialKind::ApiKey => {
                url = format!("{url}?key={}", creds.token);
                self.client.post(&url)
            }
            CredentialKind::Bearer => self.client.post(&url).bearer_auth(&creds.token),
        };
        builder = builder.json(&body);

        let resp = send_with_deadline(self.kind(), params.deadline, builder.send()).await?;
        if !resp.status().is_success() {
            return Err(error_from_response(self.kind(), resp).await);
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::network(self.kind(), e))?;
        let usage = parse_usage(&body);
        Ok(ProviderResponse {
            provider: self.kind(),
            model: params.model.clone(),
            body,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    fn request() -> ChatRequest {
        ChatRequest {
            model: None,
            messages: vec![
                ChatMessage::new("system", "be precise"),
                ChatMessage::new("user", "question"),
                ChatMessage::new("assistant", "answer"),
            ],
            stream: false,
            temperature: Some(0.1),
            max_tokens: Some(2048),
        }
    }

    #[test]
    fn system_instruction_separated_from_contents() {
        let body = build_body(&request(), &CallParams::new("gemini-3-pro"));
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be precise");
        assert_eq!(body["contents"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn assistant_role_maps_to_model() {
        let body = build_body(&request(), &CallParams::new("gemini-3-pro"));
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][0]["role"], "user");
    }

    #[test]
    fn thinking_budget_in_generation_config() {
        let mut params = CallParams::new("gemini-3-pro");
        params.thinking = Some(Thinking::Budget(20_000));
        let body = build_body(&request(), &params);
        assert_eq!(
            body["generationConfig"]["thinkingConfig"]["thinkingBudget"],
            20_000
        );
    }

    #[test]
    fn max_tokens_and_temperature_in_generation_config() {
        let body = build_body(&request(), &CallParams::new("gemini-3-pro"));
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 2048);
        assert_eq!(body["generationConfig"]["temperature"], 0.1);
    }

    #[test]
    fn usage_parsed_from_usage_metadata() {
        let body = json!({
            "candidates": [],
            "usageMetadata": { "promptTokenCount": 11, "candidatesTokenCount": 5 }
        });
        let u = parse_usage(&body);
        assert_eq!(u.prompt_tokens, 11);
        assert_eq!(u.completion_tokens, 5);
    }

    #[tokio::test]
    async fn connection_failure_is_transient() {
        let driver = GeminiDriver::new(Some("http://127.0.0.1:9".into()));
        let err = driver
            .chat(
                &request(),
                &CallParams::new("gemini-3-pro"),
                &Credentials::api_key("AIza-x"),
            )
            .await
            .unwrap_err();
        assert!(err.retryable());
    }
}
