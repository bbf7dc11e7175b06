// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! SLO gate evaluation for the external deployment validator.

use serde::Serialize;

use mimir_config::SloConfig;

use crate::StatsSnapshot;

#[derive(Debug, Clone, Serialize)]
pub struct GateResult {
    pub name: &'static str,
    pub blocking: bool,
    pub passed: bool,
    /// Observed value, when the window has data.
    pub value: Option<f64>,
    pub limit: f64,
}

/// Evaluate every gate against the current window statistics.
///
/// A gate with no data passes: an idle router is deployable, and the
/// validator distinguishes "passed" from "no traffic" via `value`.
pub fn evaluate(stats: &StatsSnapshot, slo: &SloConfig) -> Vec<GateResult> {
    let mut gates = Vec::new();

    gates.push(GateResult {
        name: "p95_latency_ms",
        blocking: true,
        passed: stats.latency_p95_ms.map_or(true, |v| v <= slo.p95_ms as f64),
        value: stats.latency_p95_ms,
        limit: slo.p95_ms as f64,
    });

    gates.push(GateResult {
        name: "failover_misfire_rate",
        blocking: true,
        passed: stats
            .misfire_rate
            .map_or(true, |v| v <= slo.max_misfire_rate),
        value: stats.misfire_rate,
        limit: slo.max_misfire_rate,
    });

    gates.push(GateResult {
        name: "uptime_pct",
        blocking: true,
        passed: stats.uptime_pct.map_or(true, |v| v >= slo.min_uptime_pct),
        value: stats.uptime_pct,
        limit: slo.min_uptime_pct,
    });

    if let Some(max_cost) = slo.max_cost_per_task {
        gates.push(GateResult {
            name: "cost_per_task",
            blocking: false,
            passed: stats.cost_mean_usd.map_or(true, |v| v <= max_cost),
            value: stats.cost_mean_usd,
            limit: max_cost,
        });
    }

    if let Some(min_win) = slo.min_win_rate {
        gates.push(GateResult {
            name: "win_rate",
            blocking: false,
            passed: stats.win_rate.map_or(true, |v| v >= min_win),
            value: stats.win_rate,
            limit: min_win,
        });
    }

    gates
}

/// True when every blocking gate passes.
pub fn deployable(gates: &[GateResult]) -> bool {
    gates.iter().filter(|g| g.blocking).all(|g| g.passed)
}
