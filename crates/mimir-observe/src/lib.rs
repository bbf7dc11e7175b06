// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Observability: per-decision records, sliding-window counters, and the
//! SLO gates consumed by the external deployment validator.
//!
//! The execution engine publishes records over an mpsc feed; this crate
//! folds them into windows. The dependency points one way only — the
//! engine never reads observability state.

mod record;
mod slo;
mod window;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use mimir_triage::Bucket;

pub use record::DecisionRecord;
pub use slo::{deployable, evaluate, GateResult};
pub use window::SlidingWindow;

/// How many recent records are kept verbatim for debugging.
const RECENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RouteShare {
    pub cheap: usize,
    pub mid: usize,
    pub hard: usize,
}

/// Point-in-time view of the counters, served on `/stats` and fed to the
/// SLO gates. `None` means the window holds no data.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub requests: usize,
    pub route_share: RouteShare,
    pub latency_p95_ms: Option<f64>,
    pub latency_p99_ms: Option<f64>,
    pub cost_mean_usd: Option<f64>,
    pub cost_p95_usd: Option<f64>,
    pub anthropic_429_rate: Option<f64>,
    pub anthropic_429_hourly: usize,
    /// Fallback attempts that still failed, over fallback attempts.
    pub misfire_rate: Option<f64>,
    pub uptime_pct: Option<f64>,
    pub win_rate: Option<f64>,
    /// Filled in by the owner, which holds the cool-down map.
    pub live_cooldowns: usize,
}

pub struct Observer {
    latencies: SlidingWindow,
    costs: SlidingWindow,
    successes: SlidingWindow,
    anthropic_429s: SlidingWindow,
    fallbacks: SlidingWindow,
    misfires: SlidingWindow,
    wins: SlidingWindow,
    buckets: Mutex<HashMap<Bucket, SlidingWindow>>,
    recent: Mutex<std::collections::VecDeque<DecisionRecord>>,
    span: Duration,
}

impl Observer {
    /// Windows default to one hour, the minimum the SLO gates require.
    pub fn new(span: Duration) -> Self {
        let span = span.max(Duration::from_secs(3_600));
        Self {
            latencies: SlidingWindow::new(span),
            costs: SlidingWindow::new(span),
            successes: SlidingWindow::new(span),
            anthropic_429s: SlidingWindow::new(span),
            fallbacks: SlidingWindow::new(span),
            misfires: SlidingWindow::new(span),
            wins: SlidingWindow::new(span),
            buckets: Mutex::new(HashMap::new()),
            recent: Mutex::new(std::collections::VecDeque::new()),
            span,
        }
    }

    /// Fold one record into the counters.
    pub fn record(&self, rec: &DecisionRecord) {
        self.latencies.push(rec.latency_ms as f64);
        self.costs.push(rec.cost_usd);
        self.successes.push(if rec.success { 1.0 } else { 0.0 });
        self.anthropic_429s
            .push(if rec.anthropic_429 { 1.0 } else { 0.0 });
        if rec.fallback_used {
            self.fallbacks.push(1.0);
            self.misfires.push(if rec.success { 0.0 } else { 1.0 });
        }
        if let Some(win) = rec.win_vs_baseline {
            self.wins.push(if win { 1.0 } else { 0.0 });
        }
        if let Some(bucket) = rec.bucket {
            self.buckets
                .lock()
                .expect("observer lock poisoned")
                .entry(bucket)
                .or_insert_with(|| SlidingWindow::new(self.span))
                .push(1.0);
        }
        let mut recent = self.recent.lock().expect("observer lock poisoned");
        if recent.len() == RECENT_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(rec.clone());
    }

    pub fn stats(&self) -> StatsSnapshot {
        let buckets = self.buckets.lock().expect("observer lock poisoned");
        let share = |b: Bucket| buckets.get(&b).map_or(0, SlidingWindow::count);
        let requests = self.successes.count();
        StatsSnapshot {
            requests,
            route_share: RouteShare {
                cheap: share(Bucket::Cheap),
                mid: share(Bucket::Mid),
                hard: share(Bucket::Hard),
            },
            latency_p95_ms: self.latencies.percentile(95.0),
            latency_p99_ms: self.latencies.percentile(99.0),
            cost_mean_usd: self.costs.mean(),
            cost_p95_usd: self.costs.percentile(95.0),
            anthropic_429_rate: self.anthropic_429s.mean(),
            anthropic_429_hourly: self.anthropic_429s.sum() as usize,
            misfire_rate: (self.fallbacks.count() > 0)
                .then(|| self.misfires.sum() / self.fallbacks.count() as f64),
            uptime_pct: self.successes.mean().map(|m| m * 100.0),
            win_rate: self.wins.mean(),
            live_cooldowns: 0,
        }
    }

    pub fn recent(&self) -> Vec<DecisionRecord> {
        self.recent
            .lock()
            .expect("observer lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Start the record feed: returns the sender handed to the engine and
    /// the task draining it into this observer.
    pub fn start(
        self: &std::sync::Arc<Self>,
    ) -> (
        mpsc::UnboundedSender<DecisionRecord>,
        tokio::task::JoinHandle<()>,
    ) {
        let (tx, mut rx) = mpsc::unbounded_channel::<DecisionRecord>();
        let observer = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(rec) = rx.recv().await {
                observer.record(&rec);
            }
            debug!("record feed closed");
        });
        (tx, handle)
    }
}

impl Default for Observer {
    fn default() -> Self {
        Self::new(Duration::from_secs(3_600))
    }
}
