// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;

use mimir_catalog::ProviderKind;

use crate::auth::Credentials;
use crate::error::ProviderError;
use crate::types::{CallParams, ChatRequest, ProviderResponse};

#[async_trait]
pub trait ProviderDriver: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Send one chat completion and return the provider's response.
    ///
    /// Implementations classify every failure into a typed
    /// [`ProviderError`]; the fallback protocol never needs to inspect
    /// provider-specific payloads.
    async fn chat(
        &self,
        req: &ChatRequest,
        params: &CallParams,
        creds: &Credentials,
    ) -> Result<ProviderResponse, ProviderError>;
}

/// Parse a `Retry-After` header value (seconds form).
pub(crate) fn retry_after_seconds(resp: &reqwest::Response) -> Option<u64> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Run `send` under the call deadline and classify timeout/network errors.
pub(crate) async fn send_with_deadline(
    kind: ProviderKind,
    deadline: std::time::Duration,
    send: impl std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
) -> Result<reqwest::Response, ProviderError> {
    match tokio::time::timeout(deadline, send).await {
        Ok(Ok(resp)) => Ok(resp),
        Ok(Err(e)) => Err(ProviderError::network(kind, e)),
        Err(_) => Err(ProviderError::timeout(kind)),
    }
}

/// Drain a non-success response into a typed error.
pub(crate) async fn error_from_response(
    kind: ProviderKind,
    resp: reqwest::Response,
) -> ProviderError {
    let status = resp.status().as_u16();
    let retry_after = retry_after_seconds(&resp);
    let body = resp.text().await.unwrap_or_default();
    ProviderError::from_status(kind, status, &body, retry_after)
}
