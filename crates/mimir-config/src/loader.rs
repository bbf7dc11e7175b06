// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Ordered list of config file locations searched from lowest to highest
/// priority. Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. System-wide default
    paths.push(PathBuf::from("/etc/mimir/config.yaml"));
    paths.push(PathBuf::from("/etc/mimir/config.yml"));

    // 2. XDG / home
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/mimir/config.yaml"));
        paths.push(home.join(".config/mimir/config.yml"));
    }
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("mimir/config.yaml"));
        paths.push(cfg.join("mimir/config.yml"));
    }

    // 3. Workspace-local
    paths.push(PathBuf::from(".mimir/config.yaml"));
    paths.push(PathBuf::from(".mimir/config.yml"));
    paths.push(PathBuf::from("mimir.yaml"));
    paths.push(PathBuf::from("mimir.yml"));

    paths
}

/// Every dotted config path an environment variable may override.
///
/// Env overrides are matched against this table instead of splitting the
/// variable name on underscores, because key names themselves contain
/// underscores (`CATALOG_BASE_URL` is `catalog.base_url`, not
/// `catalog.base.url`).
const ENV_PATHS: &[&str] = &[
    "router.alpha",
    "router.thresholds.cheap",
    "router.thresholds.hard",
    "router.top_p",
    "router.penalties.latency_sd",
    "router.penalties.ctx_over_80pct",
    "router.bucket_defaults.mid.effort",
    "router.bucket_defaults.mid.budget",
    "router.bucket_defaults.hard.effort",
    "router.bucket_defaults.hard.budget",
    "router.cheap_candidates",
    "router.mid_candidates",
    "router.hard_candidates",
    "router.unknown_model",
    "router.aggregator.exclude_authors",
    "router.aggregator.provider.sort",
    "router.aggregator.provider.max_price",
    "router.aggregator.provider.allow_fallbacks",
    "auth_adapters.enabled",
    "catalog.base_url",
    "catalog.refresh_seconds",
    "tuning.artifact_url",
    "tuning.reload_seconds",
    "observability.dashboard_port",
    "observability.slo.p95_ms",
    "observability.slo.max_misfire_rate",
    "observability.slo.min_uptime_pct",
    "observability.slo.max_cost_per_task",
    "observability.slo.min_win_rate",
    "observability.alerts.webhook_url",
    "server.listen_addr",
    "features.budget_ms",
    "features.embedding_dim",
    "features.embedding_url",
    "features.embedding_fallback_url",
    "features.cache_entries",
    "features.cache_ttl_seconds",
    "features.long_context_trigger",
];

const ENV_PREFIX: &str = "MIMIR_";

/// Load configuration by merging all discovered YAML files, then applying
/// typed environment overrides. The `extra` argument may provide an
/// explicit path (e.g. `--config` CLI flag).
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    load_with_env(extra, |name| std::env::var(name).ok())
}

/// Same as [`load`] with an injectable environment, for tests.
pub fn load_with_env(
    extra: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    // Environment overrides form the final, highest-priority layer.
    merge_yaml(&mut merged, env_layer(&env));

    let config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty()) {
        Config::default()
    } else {
        serde_yaml::from_value(merged).context("deserializing merged configuration")?
    };
    Ok(config)
}

/// Build a YAML layer from `MIMIR_*` environment variables.
///
/// Values are parsed as YAML scalars so `MIMIR_ROUTER_ALPHA=0.7` becomes a
/// float and `MIMIR_ROUTER_CHEAP_CANDIDATES='[a, b]'` a sequence.
fn env_layer(env: &impl Fn(&str) -> Option<String>) -> serde_yaml::Value {
    let mut layer = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
    for path in ENV_PATHS {
        let var = format!(
            "{ENV_PREFIX}{}",
            path.replace('.', "_").to_ascii_uppercase()
        );
        let Some(raw) = env(&var) else { continue };
        let value: serde_yaml::Value = serde_yaml::from_str(&raw)
            .unwrap_or(serde_yaml::Value::String(raw.clone()));
        debug!(%var, %path, "applying environment override");
        merge_yaml(&mut layer, nested(path, value));
    }
    layer
}

/// Wrap `value` in nested single-key mappings following the dotted path.
fn nested(path: &str, value: serde_yaml::Value) -> serde_yaml::Value {
    let mut out = value;
    for key in path.rsplit('.') {
        let mut map = serde_yaml::Mapping::new();
        map.insert(serde_yaml::Value::String(key.to_string()), out);
        out = serde_yaml::Value::Mapping(map);
    }
    out
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
