// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Anthropic-kind driver — Messages API.
//!
//! # Auth
//! `x-api-key` for API keys; OAuth bearer tokens are passed through on
//! the `Authorization` header untouched.
//!
//! # Thinking
//! Budget-style: `thinking: { type: "enabled", budget_tokens: n }`. The
//! budget arrives pre-clamped to the model's catalog ranges.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use mimir_catalog::ProviderKind;

use crate::auth::{CredentialKind, Credentials};
use crate::driver::{error_from_response, send_with_deadline, ProviderDriver};
use crate::error::ProviderError;
use crate::types::{CallParams, ChatRequest, ProviderResponse, Thinking, Usage};

pub struct AnthropicDriver {
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicDriver {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".into()),
            client: reqwest::Client::new(),
        }
    }
}

/// Build the Messages API body. System messages are lifted into the
/// top-level `system` field; remaining turns keep role and content
/// verbatim.
pub(crate) fn build_body(req: &ChatRequest, params: &CallParams) -> Value {
    let mut system = Vec::new();
    let mut messages = Vec::new();
    for m in &req.messages {
        if m.role == "system" {
            system.push(m.text());
        } else {
            messages.push(json!({ "role": m.role, "content": m.content }));
        }
    }

    let max_tokens = params.max_tokens.or(req.max_tokens).unwrap_or(4096);
    let mut body = json!({
        "model": params.model,
        "messages": messages,
        "max_tokens": max_tokens,
        "stream": req.stream,
    });
    if !system.is_empty() {
        body["system"] = json!(system.join("\n\n"));
    }
    if let Some(t) = req.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(Thinking::Budget(budget)) = &params.thinking {
        body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
    }
    body
}

fn parse_usage(body: &Value) -> Usage {
    Usage {
        prompt_tokens: body["usage"]["input_tokens"].as_u64().unwrap_or(0),
        completion_tokens: body["usage"]["output_tokens"].as_u64().unwrap_or(0),
    }
}

#[async_trait]
impl ProviderDriver for AnthropicDriver {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn chat(
        &self,
        req: &ChatRequest,
        params: &CallParams,
        creds: &Credentials,
    ) -> Result<ProviderResponse, ProviderError> {
        let body = build_body(req, params);
        debug!(model = %params.model, "sending anthropic request");

        let mut builder = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("anthropic-version", "2023-06-01")
            .json(&body);
        builder = match creds.kind {
            CredentialKind::ApiKey => builder.header("x-api-key", &creds.token),
            CredentialKind::Bearer => builder.bearer_auth(&creds.token),
        };

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
