// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! OpenAI-kind driver — Chat Completions API.
//!
//! # Auth
//! API key as bearer.
//!
//! # Thinking
//! Effort-style: `reasoning_effort: "low" | "medium" | "high"`.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use mimir_catalog::ProviderKind;

use crate::auth::Credentials;
use crate::driver::{error_from_response, send_with_deadline, ProviderDriver};
use crate::error::ProviderError;
use crate::types::{CallParams, ChatRequest, ProviderResponse, Thinking, Usage};

pub struct OpenaiDriver {
    base_url: String,
    client: reqwest::Client,
}

impl OpenaiDriver {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".into()),
            client: reqwest::Client::new(),
        }
    }
}

pub(crate) fn build_body(req: &ChatRequest, params: &CallParams) -> Value {
    let messages: Vec<Value> = req
        .messages
        .iter()
        .map(|m| json!({ "role": m.role, "content": m.content }))
        .collect();

    let mut body = json!({
        "model": params.model,
        "messages": messages,
        "stream": req.stream,
    });
    if let Some(t) = req.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(max) = params.max_tokens.or(req.max_tokens) {
        body["max_completion_tokens"] = json!(max);
    }
    if let Some(Thinking::Effort(effort)) = &params.thinking {
        body["reasoning_effort"] = json!(effort);
    }
    body
}

fn parse_usage(body: &Value) -> Usage {
    Usage {
        prompt_tokens: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
        completion_tokens: body["usage"]["completion_tokens"].as_u64().unwrap_or(0),
    }
}

#[async_trait]
impl ProviderDriver for OpenaiDriver {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Openai
    }

    async fn chat(
        &self,
        req: &ChatRequest,
        params: &CallParams,
        creds: &Credentials,
    ) -> Result<ProviderResponse, ProviderError> {
        let body = build_body(req, params);
        debug!(model = %params.model, "sending openai request");

        let resp = send_with_deadline(
            self.kind(),
            params.deadline,
            self.client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&creds.token)
                .json(&body)
                .send(),
        )
        .await?;
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
