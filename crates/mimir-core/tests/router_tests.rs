// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! End-to-end routing scenarios against scripted in-process drivers.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use mimir_artifact::Artifact;
use mimir_catalog::{
    ModelCapability, Pricing, ProviderKind, ThinkingKind, ThinkingParam, ThinkingRanges,
};
use mimir_config::Config;
use mimir_core::{RouteError, Router};
use mimir_provider::{
    CallParams, ChatMessage, ChatRequest, Credentials, ProviderDriver, ProviderError,
    ProviderResponse, RequestHeaders, Usage,
};
use mimir_triage::Bucket;

// ── Scripted driver ───────────────────────────────────────────────────────────

/// Driver that fails with the scripted statuses (in order), then succeeds.
struct ScriptedDriver {
    kind: ProviderKind,
    statuses: Mutex<VecDeque<u16>>,
    calls: Arc<Mutex<Vec<(ProviderKind, String)>>>,
}

impl ScriptedDriver {
    fn new(
        kind: ProviderKind,
        statuses: &[u16],
        calls: Arc<Mutex<Vec<(ProviderKind, String)>>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            statuses: Mutex::new(statuses.iter().copied().collect()),
            calls,
        })
    }
}

#[async_trait]
impl ProviderDriver for ScriptedDriver {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn chat(
        &self,
        _req: &ChatRequest,
        params: &CallParams,
        _creds: &Credentials,
    ) -> Result<ProviderResponse, ProviderError> {
        self.calls
            .lock()
            .unwrap()
            .push((self.kind, params.model.clone()));
        if let Some(status) = self.statuses.lock().unwrap().pop_front() {
            return Err(ProviderError::from_status(self.kind, status, "scripted", None));
        }
        Ok(ProviderResponse {
            provider: self.kind,
            model: params.model.clone(),
            body: serde_json::json!({ "ok": true, "model": params.model }),
            usage: Usage {
                prompt_tokens: 100,
                completion_tokens: 50,
            },
        })
    }
}

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn capability(
    slug: &str,
    provider: ProviderKind,
    family: &str,
    ctx_in: u64,
    author: Option<&str>,
) -> ModelCapability {
    ModelCapability {
        slug: slug.into(),
        provider,
        family: family.into(),
        ctx_in_max: ctx_in,
        ctx_out_max: 32_000,
        supports_json: true,
        supports_tools: true,
        thinking: Some(ThinkingParam {
            kind: if provider == ProviderKind::Openai {
                ThinkingKind::Effort
            } else {
                ThinkingKind::Budget
            },
            ranges: ThinkingRanges {
                low: 1_024,
                medium: 8_000,
                high: 20_000,
                max: 32_000,
            },
        }),
        pricing: Pricing {
            in_per_million: 3.0,
            out_per_million: 15.0,
        },
        author: author.map(str::to_string),
    }
}

fn test_models() -> Vec<ModelCapability> {
    vec![
        capability("claude-sonnet", ProviderKind::Anthropic, "claude", 200_000, None),
        capability("gemini-pro", ProviderKind::Gemini, "gemini-pro", 1_050_000, None),
        capability("gpt-mini", ProviderKind::Openai, "gpt", 200_000, None),
        capability(
            "open/r1",
            ProviderKind::Aggregator,
            "r1",
            128_000,
            Some("open"),
        ),
    ]
}

/// An artifact with constant per-cluster quality so cluster assignment
/// never flips test expectations.
fn test_artifact(alpha: f32) -> Artifact {
    let emergency = mimir_artifact::emergency();
    let clusters = 2usize;
    let mut qhat = HashMap::new();
    qhat.insert("claude-sonnet".to_string(), vec![0.95; clusters]);
    qhat.insert("gemini-pro".to_string(), vec![0.90; clusters]);
    qhat.insert("gpt-mini".to_string(), vec![0.60; clusters]);
    qhat.insert("open/r1".to_string(), vec![0.70; clusters]);
    let mut chat = HashMap::new();
    chat.insert("claude-sonnet".to_string(), 0.5);
    chat.insert("gemini-pro".to_string(), 0.4);
    chat.insert("gpt-mini".to_string(), 0.1);
    chat.insert("open/r1".to_string(), 0.05);
    Artifact {
        version: "test-1".into(),
        alpha,
        thresholds: mimir_artifact::Thresholds {
            cheap: 0.62,
            hard: 0.58,
        },
        penalties: mimir_artifact::Penalties {
            latency_sd: 0.0,
            ctx_over_80pct: 0.15,
        },
        centroids: vec![vec![1.0, 0.0, 0.0, 0.0], vec![0.0, 1.0, 0.0, 0.0]],
        qhat,
        chat,
        latency_sd_hint: HashMap::new(),
        gbdt: emergency.gbdt,
        fingerprint: "test-fingerprint-1".into(),
    }
}

fn test_config(mid: &[&str], hard: &[&str]) -> Config {
    let mut config = Config::default();
    config.catalog.base_url = "http://127.0.0.1:9".into();
    config.router.mid_candidates = mid.iter().map(|s| s.to_string()).collect();
    config.router.hard_candidates = hard.iter().map(|s| s.to_string()).collect();
    config.router.cheap_candidates =
        vec!["open/r1".into(), "gpt-mini".into(), "gemini-pro".into()];
    config
}

struct TestRouter {
    router: Router,
    calls: Arc<Mutex<Vec<(ProviderKind, String)>>>,
}

/// Build a router with scripted drivers. `scripts` maps provider kind to
/// the statuses its driver fails with before succeeding.
fn build_router(config: Config, alpha: f32, scripts: &[(ProviderKind, &[u16])]) -> TestRouter {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut drivers: HashMap<ProviderKind, Arc<dyn ProviderDriver>> = HashMap::new();
    for kind in ProviderKind::all() {
        let statuses = scripts
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, s)| *s)
            .unwrap_or(&[]);
        let driver: Arc<dyn ProviderDriver> = ScriptedDriver::new(kind, statuses, calls.clone());
        drivers.insert(kind, driver);
    }
    let router = Router::new(config).with_drivers(drivers);
    router.catalog().install_snapshot(test_models());
    router.install_artifact(test_artifact(alpha));
    TestRouter { router, calls }
}

/// Headers credentialed for every provider kind: anthropic via
/// `x-api-key`, gemini via `x-goog-api-key`, openai/aggregator resolve
/// from these bearer-shaped tokens.
fn all_creds_headers() -> RequestHeaders {
    RequestHeaders::from_pairs([
        ("x-api-key", "anthropic-user-key"),
        ("x-goog-api-key", "AIza-user-key"),
        ("authorization", "Bearer sk-or-v1-user"),
    ])
}

fn prompt(text: &str) -> ChatRequest {
    ChatRequest {
        model: Some("auto".into()),
        messages: vec![ChatMessage::new("user", text)],
        ..Default::default()
    }
}

/// A prompt that triages mid: longer than the cheap boundary, with code.
fn mid_prompt() -> ChatRequest {
    let code = "```python\ndef step(x):\n    return x * 2\n```\n".repeat(60);
    prompt(&code)
}

fn long_prompt(tokens: usize) -> ChatRequest {
    prompt(&"x".repeat(tokens * 4))
}

// ── Scenario: cheap code request ──────────────────────────────────────────────

#[tokio::test]
async fn short_prompt_routes_cheap_to_aggregator() {
    let t = build_router(test_config(&["claude-sonnet"], &["claude-sonnet"]), 0.6, &[]);
    let req = prompt("write a python function to compute fibonacci numbers");
    let (decision, features) = t.router.decide(&req, &all_creds_headers()).await.unwrap();

    assert_eq!(decision.bucket, Bucket::Cheap);
    assert_eq!(decision.provider, ProviderKind::Aggregator);
    assert_eq!(decision.model, "open/r1");
    assert_eq!(decision.fallbacks.len(), 2);
    assert!(decision.thinking.is_none(), "cheap bucket disables thinking");
    assert!(decision.provider_prefs.is_some());
    assert!(features.token_count < 100);
}

// ── Scenario: long-context hard ───────────────────────────────────────────────

#[tokio::test]
async fn long_context_forces_hard_and_large_family() {
    let t = build_router(
        test_config(&["claude-sonnet"], &["claude-sonnet", "gemini-pro", "gpt-mini"]),
        1.0,
        &[],
    );
    let req = long_prompt(250_000);
    let (decision, _) = t.router.decide(&req, &all_creds_headers()).await.unwrap();

    assert_eq!(decision.bucket, Bucket::Hard);
    // claude-sonnet scores highest at alpha=1 but cannot fit 250k tokens;
    // the guardrail narrows to the ≥1M family.
    assert_eq!(decision.model, "gemini-pro");
    assert_ne!(decision.provider, ProviderKind::Anthropic);
    // Hard bucket budget default, clamped within the model's ranges.
    assert_eq!(
        decision.thinking,
        Some(mimir_routing::ThinkingDirective::Budget(20_000))
    );
}

#[tokio::test]
async fn token_count_exactly_at_trigger_is_hard() {
    let t = build_router(
        test_config(&["claude-sonnet"], &["gemini-pro", "gpt-mini"]),
        0.6,
        &[],
    );
    let req = long_prompt(200_000);
    let (decision, features) = t.router.decide(&req, &all_creds_headers()).await.unwrap();
    assert_eq!(features.token_count, 200_000);
    assert_eq!(decision.bucket, Bucket::Hard);
    assert_eq!(decision.provider, ProviderKind::Gemini);
}

// ── Scenario: anthropic 429 reroute ───────────────────────────────────────────

#[tokio::test]
async fn anthropic_429_reroutes_to_non_anthropic_and_cools_down() {
    let config = test_config(&["claude-sonnet", "gemini-pro", "gpt-mini"], &["claude-sonnet"]);
    let t = build_router(config, 1.0, &[(ProviderKind::Anthropic, &[429])]);
    let headers = all_creds_headers();
    let req = mid_prompt();

    let (decision, _) = t.router.decide(&req, &headers).await.unwrap();
    assert_eq!(decision.provider, ProviderKind::Anthropic, "sonnet leads at alpha=1");

    let resp = t.router.handle(&req, &headers).await.unwrap();
    assert_ne!(
        resp.provider,
        ProviderKind::Anthropic,
        "reroute must land on a non-anthropic kind"
    );

    // The trace: anthropic first, then exactly one non-anthropic attempt.
    let calls = t.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, ProviderKind::Anthropic);
    assert_ne!(calls[1].0, ProviderKind::Anthropic);

    // Cool-down entry live for this user.
    assert_eq!(t.router.cooldowns().live_count(), 1);

    // The record captured the 429 and the fallback.
    let records = t.router.observer().recent();
    let rec = records.last().unwrap();
    assert!(rec.anthropic_429);
    assert!(rec.fallback_used);
    assert!(rec.success);

    // Cool-down monotonicity: while the entry lives, decisions for this
    // user never select anthropic.
    for _ in 0..5 {
        let (d, _) = t.router.decide(&req, &headers).await.unwrap();
        assert_ne!(d.provider, ProviderKind::Anthropic);
    }
}

#[tokio::test]
async fn non_anthropic_429_falls_back_without_cooldown() {
    // No anthropic candidate: gemini-pro leads the mid bucket at alpha=1.
    let config = test_config(&["gemini-pro", "gpt-mini"], &["gemini-pro"]);
    let t = build_router(config, 1.0, &[(ProviderKind::Gemini, &[429])]);
    let headers = all_creds_headers();
    let req = mid_prompt();

    let (decision, _) = t.router.decide(&req, &headers).await.unwrap();
    assert_eq!(decision.provider, ProviderKind::Gemini);

    let resp = t.router.handle(&req, &headers).await.unwrap();
    // Fallback must not hand the request back to the rate-limited kind.
    assert_eq!(resp.provider, ProviderKind::Openai);
    assert_eq!(
        t.router.cooldowns().live_count(),
        0,
        "only anthropic 429s create user cool-downs"
    );

    // The rate-limit mark keeps gemini out of selection for a while.
    let (next, _) = t.router.decide(&req, &headers).await.unwrap();
    assert_ne!(next.provider, ProviderKind::Gemini);
}

// ── Scenario: embedding backends down ─────────────────────────────────────────

#[tokio::test]
async fn embedding_outage_degrades_but_routes() {
    let mut config = test_config(&["claude-sonnet"], &["claude-sonnet"]);
    config.features.embedding_url = Some("http://127.0.0.1:9/embed".into());
    config.features.embedding_fallback_url = Some("http://127.0.0.1:9/embed2".into());
    let t = build_router(config, 0.6, &[]);
    let headers = all_creds_headers();

    let req = prompt("hello there");
    let resp = t.router.handle(&req, &headers).await;
    assert!(resp.is_ok(), "routing must complete on deterministic embedding");

    let records = t.router.observer().recent();
    assert!(records.last().unwrap().embedding_fallback);
}

// ── Scenario: artifact swap mid-flight ────────────────────────────────────────

#[tokio::test]
async fn concurrent_decisions_never_observe_mixed_artifact() {
    let t = Arc::new(build_router(
        test_config(&["claude-sonnet"], &["claude-sonnet"]),
        0.6,
        &[],
    ));
    let headers = all_creds_headers();

    let mut tasks = Vec::new();
    for i in 0..200 {
        let t = t.clone();
        let headers = headers.clone();
        tasks.push(tokio::spawn(async move {
            if i == 100 {
                let mut v2 = test_artifact(0.6);
                v2.version = "test-2".into();
                v2.fingerprint = "test-fingerprint-2".into();
                t.router.install_artifact(v2);
            }
            let req = ChatRequest {
                model: Some("auto".into()),
                messages: vec![ChatMessage::new("user", &format!("prompt {i}"))],
                ..Default::default()
            };
            t.router.decide(&req, &headers).await
        }));
    }
    for task in tasks {
        let result = task.await.unwrap();
        let (decision, _) = result.expect("decision must succeed across swap");
        assert!(
            decision.artifact_version == "test-1" || decision.artifact_version == "test-2",
            "unexpected version {}",
            decision.artifact_version
        );
    }
}

// ── Scenario: policy deny ─────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_explicit_model_is_denied_without_host_fallback() {
    let t = build_router(test_config(&["claude-sonnet"], &["claude-sonnet"]), 0.6, &[]);
    let headers = all_creds_headers();
    let req = ChatRequest {
        model: Some("some-model-nobody-knows".into()),
        messages: vec![ChatMessage::new("user", "hi")],
        ..Default::default()
    };

    let err = t.router.handle(&req, &headers).await.unwrap_err();
    match &err {
        RouteError::UnknownModel(m) => assert_eq!(m, "some-model-nobody-knows"),
        other => panic!("expected UnknownModel, got {other:?}"),
    }
    assert!(!err.allow_host_fallback());

    let records = t.router.observer().recent();
    assert_eq!(records.last().unwrap().denied.as_deref(), Some("unknown_model"));
    assert!(t.calls.lock().unwrap().is_empty(), "no provider was called");
}

#[tokio::test]
async fn unknown_model_rewrites_to_auto_when_configured() {
    let mut config = test_config(&["claude-sonnet"], &["claude-sonnet"]);
    config.router.unknown_model = mimir_config::UnknownModelPolicy::Auto;
    let t = build_router(config, 0.6, &[]);
    let req = ChatRequest {
        model: Some("some-model-nobody-knows".into()),
        messages: vec![ChatMessage::new("user", "short question")],
        ..Default::default()
    };
    let resp = t.router.handle(&req, &all_creds_headers()).await;
    assert!(resp.is_ok(), "auto policy must route instead of denying");
}

#[tokio::test]
async fn explicit_known_model_short_circuits_triage() {
    let t = build_router(test_config(&["claude-sonnet"], &["claude-sonnet"]), 0.6, &[]);
    let req = ChatRequest {
        model: Some("gpt-mini".into()),
        messages: vec![ChatMessage::new("user", "hi")],
        ..Default::default()
    };
    let (decision, _) = t.router.decide(&req, &all_creds_headers()).await.unwrap();
    assert_eq!(decision.model, "gpt-mini");
    assert_eq!(decision.provider, ProviderKind::Openai);
    assert!(decision.fallbacks.is_empty(), "user overrides are not rerouted");
}

// ── Fallback protocol details ─────────────────────────────────────────────────

#[tokio::test]
async fn transient_failure_uses_fallback_list() {
    let config = test_config(&["gemini-pro", "gpt-mini", "claude-sonnet"], &["gemini-pro"]);
    let t = build_router(config, 1.0, &[(ProviderKind::Anthropic, &[503])]);
    let headers = all_creds_headers();
    let req = mid_prompt();

    let resp = t.router.handle(&req, &headers).await.unwrap();
    assert_ne!(resp.provider, ProviderKind::Anthropic);
    let records = t.router.observer().recent();
    let rec = records.last().unwrap();
    assert!(rec.fallback_used);
    assert!(!rec.anthropic_429);
    assert!(rec.success);
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let config = test_config(&["claude-sonnet", "gemini-pro"], &["claude-sonnet"]);
    let t = build_router(config, 1.0, &[(ProviderKind::Anthropic, &[400])]);
    let headers = all_creds_headers();

    let err = t.router.handle(&mid_prompt(), &headers).await.unwrap_err();
    assert!(!err.allow_host_fallback());
    assert_eq!(t.calls.lock().unwrap().len(), 1, "no fallback after a 400");
}

#[tokio::test]
async fn attempts_are_bounded() {
    // Every provider rate-limits; the engine stops after two attempts.
    let config = test_config(&["claude-sonnet", "gemini-pro", "gpt-mini"], &["claude-sonnet"]);
    let t = build_router(
        config,
        1.0,
        &[
            (ProviderKind::Anthropic, &[429, 429]),
            (ProviderKind::Gemini, &[429, 429]),
            (ProviderKind::Openai, &[429, 429]),
            (ProviderKind::Aggregator, &[429, 429]),
        ],
    );
    let err = t
        .router
        .handle(&mid_prompt(), &all_creds_headers())
        .await
        .unwrap_err();
    assert!(matches!(err, RouteError::Provider(_)));
    assert!(t.calls.lock().unwrap().len() <= 2);
}

// ── Health weighting ──────────────────────────────────────────────────────────

#[tokio::test]
async fn degraded_provider_loses_selection_weight_but_stays_rankable() {
    use mimir_provider::HealthStatus;

    let config = test_config(&["claude-sonnet", "gemini-pro"], &["claude-sonnet"]);
    let t = build_router(config, 1.0, &[]);
    let headers = all_creds_headers();
    let req = mid_prompt();

    // Healthy: sonnet (q 0.95) leads gemini (q 0.90) at alpha=1.
    let (decision, _) = t.router.decide(&req, &headers).await.unwrap();
    assert_eq!(decision.provider, ProviderKind::Anthropic);

    // Two failures in ten recent outcomes: degraded, not unhealthy.
    for i in 0..10 {
        t.router.health().record(ProviderKind::Anthropic, i % 5 != 0);
    }
    assert_eq!(
        t.router.health().status(ProviderKind::Anthropic),
        HealthStatus::Degraded
    );

    // The halved quality term flips the ranking to the healthy kind,
    // but sonnet remains ranked (and available as a fallback).
    let (degraded, _) = t.router.decide(&req, &headers).await.unwrap();
    assert_eq!(degraded.provider, ProviderKind::Gemini);
    assert!(
        degraded
            .scores
            .iter()
            .any(|s| s.provider == ProviderKind::Anthropic),
        "degraded kinds are deprioritized, not excluded"
    );
    assert!(degraded
        .fallbacks
        .iter()
        .any(|f| f.provider == ProviderKind::Anthropic));
}

// ── Selector invariants ───────────────────────────────────────────────────────

#[tokio::test]
async fn rescoring_is_byte_identical() {
    let t = build_router(test_config(&["claude-sonnet"], &["claude-sonnet"]), 0.6, &[]);
    let headers = all_creds_headers();
    let req = prompt("a stable prompt");
    let (d1, _) = t.router.decide(&req, &headers).await.unwrap();
    let (d2, _) = t.router.decide(&req, &headers).await.unwrap();
    assert_eq!(d1.model, d2.model);
    let s1: Vec<(String, u32)> = d1.scores.iter().map(|s| (s.slug.clone(), s.score.to_bits())).collect();
    let s2: Vec<(String, u32)> = d2.scores.iter().map(|s| (s.slug.clone(), s.score.to_bits())).collect();
    assert_eq!(s1, s2);
}

// ── Plugin boundary ───────────────────────────────────────────────────────────

#[tokio::test]
async fn route_plugin_rewrites_model_on_continue() {
    use mimir_core::{PluginChain, PluginContext, PreHookOutcome, RoutePlugin};

    let t = build_router(test_config(&["claude-sonnet"], &["claude-sonnet"]), 0.6, &[]);
    let router = Arc::new(t.router);
    let mut chain = PluginChain::new();
    chain.push(Arc::new(RoutePlugin::new(router)));

    let mut ctx = PluginContext::new("req-1", all_creds_headers());
    let (outcome, ran) = chain
        .run_pre(&mut ctx, prompt("write a python function to compute fibonacci numbers"))
        .await
        .unwrap();
    assert_eq!(ran, 1);
    match outcome {
        PreHookOutcome::Continue(req) => {
            assert_eq!(req.model.as_deref(), Some("open/r1"));
            assert!(ctx.values.contains_key("mimir.decision"));
        }
        other => panic!("expected continue, got {other:?}"),
    }
    chain.cleanup().await.unwrap();
}

#[tokio::test]
async fn route_plugin_denies_without_host_fallback() {
    use mimir_core::{PluginChain, PluginContext, PreHookOutcome, RoutePlugin};

    let t = build_router(test_config(&["claude-sonnet"], &["claude-sonnet"]), 0.6, &[]);
    let router = Arc::new(t.router);
    let mut chain = PluginChain::new();
    chain.push(Arc::new(RoutePlugin::new(router)));

    let mut ctx = PluginContext::new("req-2", all_creds_headers());
    let req = ChatRequest {
        model: Some("no-such-model".into()),
        messages: vec![ChatMessage::new("user", "hi")],
        ..Default::default()
    };
    let (outcome, _) = chain.run_pre(&mut ctx, req).await.unwrap();
    match outcome {
        PreHookOutcome::ShortCircuit {
            error,
            allow_fallbacks,
            ..
        } => {
            assert!(!allow_fallbacks);
            assert_eq!(error.unwrap().code, "unknown_model");
        }
        other => panic!("expected short circuit, got {other:?}"),
    }
}

#[tokio::test]
async fn feature_extraction_meets_budget() {
    let t = build_router(test_config(&["claude-sonnet"], &["claude-sonnet"]), 0.6, &[]);
    let headers = all_creds_headers();
    let started = std::time::Instant::now();
    let _ = t.router.decide(&prompt("quick"), &headers).await.unwrap();
    assert!(
        started.elapsed() < std::time::Duration::from_millis(500),
        "decision path must stay near the extraction budget, took {:?}",
        started.elapsed()
    );
}
