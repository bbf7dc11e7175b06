// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Aggregator-kind driver — OpenAI-compatible meta-provider fronting
//! many open models.
//!
//! # Auth
//! API key as bearer.
//!
//! # Provider preferences
//! Routing preferences from config (`sort`, `max_price`,
//! `allow_fallbacks`) are forwarded verbatim in the request body's
//! `provider` object. Author exclusion happens earlier, at candidate
//! construction — by the time a call reaches this driver the model has
//! already passed the exclude-authors filter.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use mimir_catalog::ProviderKind;

use crate::auth::Credentials;
use crate::driver::{error_from_response, send_with_deadline, ProviderDriver};
use crate::error::ProviderError;
use crate::types::{CallParams, ChatRequest, ProviderResponse, Thinking, Usage};

pub struct AggregatorDriver {
    base_url: String,
    client: reqwest::Client,
}

impl AggregatorDriver {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| "https://openrouter.ai/api/v1".into()),
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
        body["max_tokens"] = json!(max);
    }
    match &params.thinking {
        Some(Thinking::Effort(effort)) => {
            body["reasoning"] = json!({ "effort": effort });
        }
        Some(Thinking::Budget(budget)) => {
            body["reasoning"] = json!({ "max_tokens": budget });
        }
        None => {}
    }
    if let Some(prefs) = &params.provider_prefs {
        let mut provider = json!({
            "sort": prefs.sort,
            "allow_fallbacks": prefs.allow_fallbacks,
        });
        if let Some(max_price) = prefs.max_price {
            provider["max_price"] = json!({ "completion": max_price });
        }
        body["provider"] = provider;
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
impl ProviderDriver for AggregatorDriver {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Aggregator
    }

    async fn chat(
        &self,
        req: &ChatRequest,
        params: &CallParams,
        creds: &Credentials,
    ) -> Result<ProviderResponse, ProviderError> {
        let body = build_body(req, params);
        debug!(model = %params.model, "sending aggregator request");

        let resp = send_with_deadline(
            self.kind(),
            params.deadline,
            self.client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&creds.token)
                .header("X-Title", "mimir")
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
