// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The `Router` value: owner of every piece of shared routing state, and
//! the decision pipeline (auth detect → features → triage → policy →
//! selection).
//!
//! There are no process-wide singletons: the artifact pointer, cool-down
//! map, caches, health counters, and observer all live here, owned by
//! whoever constructs the router.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use mimir_artifact::{Artifact, ArtifactLoader, Swap};
use mimir_catalog::{CatalogClient, CatalogSnapshot, ProviderKind};
use mimir_config::Config;
use mimir_features::{ExtractorOptions, FeatureExtractor, Features, RemoteBackend};
use mimir_observe::Observer;
use mimir_provider::{
    AuthRegistry, HealthRegistry, HealthStatus, ProviderDriver, RequestHeaders,
};
use mimir_routing::{
    choose_bucket, shortlist, BucketChoice, CooldownMap, Decision, PolicyParams,
    ThinkingDirective, ANTHROPIC_429,
};
use mimir_triage::TriageClassifier;

use crate::error::RouteError;

/// How long a non-anthropic provider stays excluded after a 429.
const RATE_LIMIT_MARK: Duration = Duration::from_secs(30);

/// Transient per-kind exclusions after non-anthropic rate limits.
#[derive(Default)]
pub(crate) struct ProviderMarks {
    until: Mutex<HashMap<ProviderKind, Instant>>,
}

impl ProviderMarks {
    pub(crate) fn mark(&self, kind: ProviderKind) {
        self.until
            .lock()
            .expect("marks lock poisoned")
            .insert(kind, Instant::now() + RATE_LIMIT_MARK);
    }

    fn marked(&self, kind: ProviderKind) -> bool {
        self.until
            .lock()
            .expect("marks lock poisoned")
            .get(&kind)
            .is_some_and(|&until| Instant::now() < until)
    }
}

pub struct Router {
    pub(crate) config: Config,
    artifact: Swap<Artifact>,
    catalog: Arc<CatalogClient>,
    extractor: FeatureExtractor,
    triage: TriageClassifier,
    pub(crate) cooldowns: CooldownMap,
    pub(crate) health: HealthRegistry,
    pub(crate) marks: ProviderMarks,
    pub(crate) drivers: HashMap<ProviderKind, Arc<dyn ProviderDriver>>,
    pub(crate) auth: AuthRegistry,
    pub(crate) observer: Arc<Observer>,
}

impl Router {
    /// Build a router from configuration, seeded with the emergency
    /// artifact and the production driver set.
    pub fn new(config: Config) -> Self {
        let mut backends: Vec<Arc<dyn mimir_features::EmbeddingBackend>> = Vec::new();
        if let Some(url) = &config.features.embedding_url {
            backends.push(Arc::new(RemoteBackend::new("primary", url.clone())));
        }
        if let Some(url) = &config.features.embedding_fallback_url {
            backends.push(Arc::new(RemoteBackend::new("secondary", url.clone())));
        }
        let extractor = FeatureExtractor::with_backends(
            ExtractorOptions {
                budget: Duration::from_millis(config.features.budget_ms),
                embedding_dim: config.features.embedding_dim,
                reference_ctx: config.features.long_context_trigger,
                cache_entries: config.features.cache_entries,
                cache_ttl: Duration::from_secs(config.features.cache_ttl_seconds),
            },
            backends,
        );

        let catalog = Arc::new(CatalogClient::new(
            config.catalog.base_url.clone(),
            Duration::from_secs(config.catalog.refresh_seconds),
        ));
        let auth = AuthRegistry::from_enabled(&config.auth_adapters.enabled);

        let router = Self {
            artifact: Swap::new(mimir_artifact::emergency()),
            catalog,
            extractor,
            triage: TriageClassifier::new(),
            cooldowns: CooldownMap::new(),
            health: HealthRegistry::default(),
            marks: ProviderMarks::default(),
            drivers: mimir_provider::default_drivers(),
            auth,
            observer: Arc::new(Observer::default()),
            config,
        };
        // Fold config overrides into the seeded artifact too.
        let seeded = router.artifact.get().as_ref().clone();
        router.install_artifact(seeded);
        router
    }

    /// Replace the driver set (tests, custom endpoints).
    pub fn with_drivers(
        mut self,
        drivers: HashMap<ProviderKind, Arc<dyn ProviderDriver>>,
    ) -> Self {
        self.drivers = drivers;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &CatalogClient {
        &self.catalog
    }

    pub fn observer(&self) -> &Arc<Observer> {
        &self.observer
    }

    pub fn cooldowns(&self) -> &CooldownMap {
        &self.cooldowns
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn triage_stats(&self) -> mimir_triage::TriageStatsSnapshot {
        self.triage.stats().snapshot()
    }

    pub fn health_snapshot(&self) -> HashMap<ProviderKind, HealthStatus> {
        self.health.snapshot()
    }

    /// Current artifact snapshot; pinned by callers for a whole request.
    pub fn artifact(&self) -> Arc<Artifact> {
        self.artifact.get()
    }

    /// Publish a new artifact, folding the config's alpha / threshold /
    /// penalty overrides into the value so the hot path reads one source.
    pub fn install_artifact(&self, mut artifact: Artifact) {
        if let Some(alpha) = self.config.router.alpha {
            artifact.alpha = alpha;
        }
        if let Some(cheap) = self.config.router.thresholds.cheap {
            artifact.thresholds.cheap = cheap;
        }
        if let Some(hard) = self.config.router.thresholds.hard {
            artifact.thresholds.hard = hard;
        }
        if let Some(p) = self.config.router.penalties.latency_sd {
            artifact.penalties.latency_sd = p;
        }
        if let Some(p) = self.config.router.penalties.ctx_over_80pct {
            artifact.penalties.ctx_over_80pct = p;
        }
        debug!(version = %artifact.version, "publishing artifact");
        self.artifact.set(artifact);
    }

    /// Reload the artifact from the configured source when it changed.
    /// Failures are soft: the current artifact keeps serving.
    pub async fn refresh_artifact(&self) {
        let url = &self.config.tuning.artifact_url;
        if url.is_empty() {
            return;
        }
        let current = self.artifact.get().fingerprint.clone();
        match ArtifactLoader::new(url.clone()).load_if_changed(&current).await {
            Ok(Some(artifact)) => self.install_artifact(artifact),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "artifact reload failed, keeping current"),
        }
    }

    /// The credential material identifying the user, for cool-down keys.
    pub(crate) fn user_token(headers: &RequestHeaders) -> Option<String> {
        headers
            .bearer()
            .or_else(|| headers.get("x-api-key"))
            .or_else(|| headers.get("x-goog-api-key"))
            .map(str::to_string)
    }

    /// Current per-kind selection weights from provider health.
    ///
    /// Degraded kinds keep a reduced weight and stay rankable; unhealthy
    /// kinds are additionally hard-excluded by
    /// [`excluded_kinds`][Self::excluded_kinds].
    fn health_weights(&self) -> HashMap<ProviderKind, f32> {
        ProviderKind::all()
            .into_iter()
            .map(|kind| (kind, self.health.status(kind).weight()))
            .collect()
    }

    /// Provider kinds excluded from selection for this user right now:
    /// live cool-downs, rate-limit marks, and unhealthy providers.
    fn excluded_kinds(&self, headers: &RequestHeaders) -> Vec<ProviderKind> {
        let mut excluded = Vec::new();
        if let Some(token) = Self::user_token(headers) {
            if self.cooldowns.active(&token).as_deref() == Some(ANTHROPIC_429) {
                excluded.push(ProviderKind::Anthropic);
            }
        }
        for kind in ProviderKind::all() {
            if excluded.contains(&kind) {
                continue;
            }
            if self.marks.marked(kind) || self.health.status(kind) == HealthStatus::Unhealthy {
                excluded.push(kind);
            }
        }
        excluded
    }

    /// Run policy + selection for already-extracted features.
    ///
    /// Factored out of [`decide`][Self::decide] so the engine can re-run
    /// it during the 429 reroute with extra exclusions.
    pub(crate) fn select(
        &self,
        features: &Features,
        snapshot: &CatalogSnapshot,
        artifact: &Artifact,
        extra_excluded: &[ProviderKind],
        headers: &RequestHeaders,
    ) -> Result<(Decision, BucketChoice), RouteError> {
        let params = PolicyParams {
            cheap_threshold: artifact.thresholds.cheap,
            hard_threshold: artifact.thresholds.hard,
            long_context_trigger: self.config.features.long_context_trigger,
        };
        let probs = self.triage.classify(features, artifact);
        let choice = choose_bucket(&probs, features, &params);

        let candidates = self.config.candidates_for(choice.bucket.as_str());
        let list = shortlist(
            snapshot,
            candidates,
            features.token_count,
            choice.long_context,
            &self.config.router.aggregator.exclude_authors,
        );

        let mut excluded = self.excluded_kinds(headers);
        for kind in extra_excluded {
            if !excluded.contains(kind) {
                excluded.push(*kind);
            }
        }

        let ranked = mimir_routing::rank(
            artifact,
            &list,
            features,
            candidates,
            &excluded,
            &self.health_weights(),
        );
        let decision = mimir_routing::build_decision(
            ranked,
            choice.bucket,
            &self.config.router,
            &artifact.version,
            None,
        )
        .map(|d| self.clamp_thinking(d, snapshot))
        .ok_or_else(|| RouteError::NoCandidates(choice.bucket.to_string()))?;

        debug!(
            bucket = %choice.bucket,
            model = %decision.model,
            provider = %decision.provider,
            fallbacks = decision.fallbacks.len(),
            "decision"
        );
        Ok((decision, choice))
    }

    /// Clamp the requested thinking directive to the primary model's
    /// declared ranges; models without a thinking descriptor get none.
    fn clamp_thinking(&self, mut decision: Decision, snapshot: &CatalogSnapshot) -> Decision {
        let capability = snapshot.lookup(&decision.model);
        decision.thinking = match (decision.thinking.take(), capability.and_then(|c| c.thinking.as_ref())) {
            (Some(ThinkingDirective::Budget(b)), Some(t)) => {
                Some(ThinkingDirective::Budget(t.clamp_budget(b)))
            }
            (Some(ThinkingDirective::Effort(e)), Some(_)) => {
                Some(ThinkingDirective::Effort(e))
            }
            _ => None,
        };
        decision
    }

    /// The full decision pipeline for one request.
    pub async fn decide(
        &self,
        req: &mimir_provider::ChatRequest,
        headers: &RequestHeaders,
    ) -> Result<(Decision, Features), RouteError> {
        let artifact = self.artifact.get();
        let snapshot = self.catalog.snapshot().await;

        // Request-auth detection happens first: the adapter that matches
        // determines which provider the caller is credentialed for, which
        // matters for AuthMissing fallback filtering later.
        let detected = self.auth.detect(headers).map(|a| a.provider());
        debug!(?detected, "request auth detected");

        let mut req = req;
        let rewritten;
        if !req.is_auto() {
            let slug = req.model.as_deref().unwrap_or_default();
            let known = self.known_candidate(slug);
            match (known, self.config.router.unknown_model) {
                (true, _) => {
                    // Explicit override honored: short-circuit triage.
                    if let Some(decision) = self.explicit_decision(slug, &snapshot, &artifact) {
                        let features = self
                            .extractor
                            .extract(&req.concatenated_text(), &artifact)
                            .await;
                        return Ok((decision, features));
                    }
                    return Err(RouteError::UnknownModel(slug.to_string()));
                }
                (false, mimir_config::UnknownModelPolicy::Deny) => {
                    return Err(RouteError::UnknownModel(slug.to_string()));
                }
                (false, mimir_config::UnknownModelPolicy::Auto) => {
                    let mut r = req.clone();
                    r.model = Some("auto".into());
                    rewritten = r;
                    req = &rewritten;
                }
            }
        }

        let features = self
            .extractor
            .extract(&req.concatenated_text(), &artifact)
            .await;
        let (decision, _choice) = self.select(&features, &snapshot, &artifact, &[], headers)?;
        Ok((decision, features))
    }

    /// Whether `slug` appears in any candidate list.
    fn known_candidate(&self, slug: &str) -> bool {
        ["cheap", "mid", "hard"]
            .iter()
            .any(|b| self.config.candidates_for(b).iter().any(|c| c == slug))
    }

    /// Decision for an explicit, known model: no triage and no fallback
    /// list — a user override is never silently rerouted.
    fn explicit_decision(
        &self,
        slug: &str,
        snapshot: &CatalogSnapshot,
        artifact: &Artifact,
    ) -> Option<Decision> {
        let capability = snapshot.lookup(slug)?;
        let decision = Decision {
            id: uuid::Uuid::new_v4().to_string(),
            provider: capability.provider,
            model: slug.to_string(),
            bucket: mimir_triage::Bucket::Mid,
            thinking: None,
            max_tokens: None,
            provider_prefs: (capability.provider == ProviderKind::Aggregator)
                .then(|| self.config.router.aggregator.provider.clone()),
            auth_adapter: capability.provider.as_str().to_string(),
            fallbacks: Vec::new(),
            artifact_version: artifact.version.clone(),
            scores: Vec::new(),
        };
        Some(decision)
    }
}
