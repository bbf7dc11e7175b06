// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Execution engine: provider calls, typed fallback, and the
//! anthropic-429 reroute contract.
//!
//! Fallback protocol:
//! - 5xx / timeout / connection failures try the next candidate in the
//!   decision's fallback list, at most two attempts total.
//! - A 429 from the anthropic-kind provider triggers the immediate
//!   non-anthropic reroute: selection re-runs with anthropic excluded
//!   and the replacement is called straight away. A per-user cool-down
//!   keeps subsequent selections away from anthropic preemptively.
//! - A 429 from any other provider marks that kind rate-limited for a
//!   short window and falls back like a 5xx, skipping same-kind
//!   candidates.
//! - Non-retryable errors (4xx, content filter) surface immediately.
//! - `AuthMissing` restricts fallback to providers the router can
//!   authenticate against from its own environment.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use mimir_catalog::ProviderKind;
use mimir_features::Features;
use mimir_observe::DecisionRecord;
use mimir_provider::{
    CallParams, ChatRequest, ErrorKind, ProviderError, ProviderResponse, RequestHeaders,
    Thinking,
};
use mimir_routing::{Decision, ThinkingDirective, ANTHROPIC_429};

use crate::error::RouteError;
use crate::router::Router;

/// Total attempts per request, primary included.
const MAX_ATTEMPTS: u32 = 2;

/// Per-user anthropic cool-down after a 429.
const COOLDOWN_TTL: Duration = Duration::from_secs(180);

/// What actually happened during execution; folded into the record.
#[derive(Debug, Default, Clone)]
pub struct ExecutionMeta {
    pub attempts: u32,
    pub fallback_used: bool,
    pub fallback_reason: Option<String>,
    pub anthropic_429: bool,
}

/// One concrete upstream call target.
#[derive(Debug, Clone)]
struct Attempt {
    provider: ProviderKind,
    model: String,
    thinking: Option<ThinkingDirective>,
    prefs: Option<mimir_config::AggregatorProviderPrefs>,
}

impl Attempt {
    fn primary(decision: &Decision) -> Self {
        Self {
            provider: decision.provider,
            model: decision.model.clone(),
            thinking: decision.thinking.clone(),
            prefs: decision.provider_prefs.clone(),
        }
    }
}

impl Router {
    /// Execute a decision, applying the fallback protocol.
    pub async fn execute(
        &self,
        decision: &Decision,
        req: &ChatRequest,
        features: &Features,
        headers: &RequestHeaders,
    ) -> (Result<ProviderResponse, RouteError>, ExecutionMeta) {
        let mut meta = ExecutionMeta::default();
        let mut current = Attempt::primary(decision);
        let mut fallbacks = decision.fallbacks.iter();

        loop {
            meta.attempts += 1;
            let err = match self.attempt(&current, req, headers).await {
                Ok(resp) => {
                    self.health.record(current.provider, true);
                    return (Ok(resp), meta);
                }
                Err(e) => e,
            };
            self.health.record(current.provider, false);
            warn!(
                provider = %current.provider,
                model = %current.model,
                error = %err,
                attempt = meta.attempts,
                "provider call failed"
            );

            // Anthropic rate limit: cool the user down and reroute to a
            // non-anthropic provider immediately.
            if err.is_anthropic_rate_limit() {
                meta.anthropic_429 = true;
                if let Some(token) = Router::user_token(headers) {
                    self.cooldowns.note(&token, ANTHROPIC_429, COOLDOWN_TTL);
                }
                if meta.attempts >= MAX_ATTEMPTS {
                    return (Err(err.into()), meta);
                }
                let snapshot = self.catalog().snapshot().await;
                let artifact = self.artifact();
                match self.select(
                    features,
                    &snapshot,
                    &artifact,
                    &[ProviderKind::Anthropic],
                    headers,
                ) {
                    Ok((reroute, _)) => {
                        debug!(model = %reroute.model, "rerouting after anthropic 429");
                        meta.fallback_used = true;
                        meta.fallback_reason = Some(ANTHROPIC_429.into());
                        current = Attempt::primary(&reroute);
                        continue;
                    }
                    Err(_) => return (Err(err.into()), meta),
                }
            }

            if err.is_rate_limit() {
                self.marks.mark(current.provider);
            }

            let auth_missing = err.kind == ErrorKind::AuthMissing;
            if (!err.retryable() && !auth_missing) || meta.attempts >= MAX_ATTEMPTS {
                return (Err(err.into()), meta);
            }

            // Pick the next viable fallback candidate.
            let next = fallbacks.find(|fb| {
                if err.is_rate_limit() && fb.provider == current.provider {
                    // Never hand the request back to the rate-limited kind.
                    return false;
                }
                if auth_missing && !self.auth.env_credentialed(fb.provider) {
                    return false;
                }
                true
            });
            match next {
                Some(fb) => {
                    meta.fallback_used = true;
                    meta.fallback_reason = Some(format!("{:?}", err.kind).to_lowercase());
                    current = Attempt {
                        provider: fb.provider,
                        model: fb.model.clone(),
                        thinking: match decision.bucket {
                            mimir_triage::Bucket::Cheap => None,
                            mimir_triage::Bucket::Mid => mimir_routing::thinking_for(
                                &self.config.router.bucket_defaults.mid,
                                fb.provider,
                            ),
                            mimir_triage::Bucket::Hard => mimir_routing::thinking_for(
                                &self.config.router.bucket_defaults.hard,
                                fb.provider,
                            ),
                        },
                        prefs: (fb.provider == ProviderKind::Aggregator)
                            .then(|| self.config.router.aggregator.provider.clone()),
                    };
                }
                None => return (Err(err.into()), meta),
            }
        }
    }

    /// One upstream call: resolve credentials, map the thinking
    /// directive, dispatch to the driver.
    async fn attempt(
        &self,
        attempt: &Attempt,
        req: &ChatRequest,
        headers: &RequestHeaders,
    ) -> Result<ProviderResponse, ProviderError> {
        let driver = self.drivers.get(&attempt.provider).ok_or_else(|| {
            ProviderError::new(
                ErrorKind::Permanent,
                attempt.provider,
                "no driver registered for provider kind",
            )
        })?;
        let creds = self.auth.resolve(attempt.provider, headers)?;

        let params = CallParams {
            model: attempt.model.clone(),
            thinking: attempt.thinking.as_ref().map(|t| match t {
                ThinkingDirective::Effort(e) => Thinking::Effort(e.clone()),
                ThinkingDirective::Budget(b) => Thinking::Budget(*b),
            }),
            max_tokens: req.max_tokens,
            provider_prefs: attempt.prefs.clone(),
            deadline: Duration::from_secs(120),
        };

        let result = driver.chat(req, &params, &creds).await;

        // Expired OAuth token: refresh once (single-flight per user) and
        // replay the call with the fresh credentials.
        if let Err(e) = &result {
            if e.kind == ErrorKind::AuthInvalid {
                if let Some(refresh_token) = creds.refresh_token.as_deref() {
                    let flow = self
                        .auth
                        .adapter_for(attempt.provider)
                        .and_then(|a| a.oauth());
                    if let Some(flow) = flow {
                        match flow.refresh(refresh_token).await {
                            Ok(fresh) => return driver.chat(req, &params, &fresh).await,
                            Err(refresh_err) => {
                                warn!(error = %refresh_err, "token refresh failed");
                            }
                        }
                    }
                }
            }
        }
        result
    }

    /// Full request path: decide, execute, record.
    ///
    /// Exactly one record is emitted per request, after completion, so
    /// records arrive in completion order.
    pub async fn handle(
        &self,
        req: &ChatRequest,
        headers: &RequestHeaders,
    ) -> Result<ProviderResponse, RouteError> {
        let started = Instant::now();
        let mut record = DecisionRecord::new(uuid::Uuid::new_v4().to_string());
        record.win_vs_baseline = headers
            .get("x-mimir-win-vs-baseline")
            .and_then(|v| v.parse::<bool>().ok());

        let (decision, features) = match self.decide(req, headers).await {
            Ok(ok) => ok,
            Err(e) => {
                record.denied = Some(e.code().to_string());
                record.latency_ms = started.elapsed().as_millis() as u64;
                self.observer.record(&record);
                return Err(e);
            }
        };

        record.bucket = Some(decision.bucket);
        record.provider = Some(decision.provider);
        record.model = Some(decision.model.clone());
        record.artifact_version = decision.artifact_version.clone();
        record.embedding_fallback = features.embedding_fallback;

        let (result, meta) = self.execute(&decision, req, &features, headers).await;
        record.fallback_used = meta.fallback_used;
        record.fallback_reason = meta.fallback_reason.clone();
        record.anthropic_429 = meta.anthropic_429;
        record.latency_ms = started.elapsed().as_millis() as u64;

        if let Ok(resp) = &result {
            record.success = true;
            record.provider = Some(resp.provider);
            record.model = Some(resp.model.clone());
            record.prompt_tokens = resp.usage.prompt_tokens;
            record.completion_tokens = resp.usage.completion_tokens;
            let snapshot = self.catalog().snapshot().await;
            if let Some(pricing) = snapshot.pricing(&resp.model) {
                record.cost_usd =
                    pricing.cost(resp.usage.prompt_tokens, resp.usage.completion_tokens);
            }
        }
        self.observer.record(&record);
        result
    }
}
