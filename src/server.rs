// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! HTTP surface: chat completions in, provider responses out.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json,
};
use serde_json::json;
use tracing::debug;

use mimir_core::{RouteError, Router};
use mimir_observe::{deployable, evaluate};
use mimir_provider::{ChatRequest, RequestHeaders};

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<Router>,
}

pub fn app(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Stats-only surface for `observability.dashboard_port`: no request
/// routing, safe to expose to dashboards and the deployment validator.
pub fn dashboard_app(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .with_state(state)
}

fn to_request_headers(headers: &HeaderMap) -> RequestHeaders {
    RequestHeaders::from_pairs(
        headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str(), v.to_string()))),
    )
}

fn error_status(err: &RouteError) -> StatusCode {
    match err.code() {
        "auth_missing" | "auth_invalid" => StatusCode::UNAUTHORIZED,
        "unknown_model" | "no_candidates" => StatusCode::UNPROCESSABLE_ENTITY,
        "rate_limit" => StatusCode::TOO_MANY_REQUESTS,
        "timeout" => StatusCode::GATEWAY_TIMEOUT,
        "content_filter" | "context_overflow" | "provider_permanent" => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    }
}

async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Response {
    let request_headers = to_request_headers(&headers);
    match state.router.handle(&req, &request_headers).await {
        // The upstream body is forwarded verbatim.
        Ok(resp) => Json(resp.body).into_response(),
        Err(err) => {
            debug!(code = err.code(), "request failed");
            let status = error_status(&err);
            let body = json!({
                "error": {
                    "code": err.code(),
                    "message": err.to_string(),
                    "allow_fallbacks": err.allow_host_fallback(),
                },
                "request_id": uuid::Uuid::new_v4().to_string(),
            });
            (status, Json(body)).into_response()
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "artifact_version": state.router.artifact().version,
        "providers": state.router.health_snapshot(),
    }))
}

async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut stats = state.router.observer().stats();
    stats.live_cooldowns = state.router.cooldowns().live_count();
    let gates = evaluate(&stats, &state.router.config().observability.slo);
    Json(json!({
        "stats": stats,
        "triage": state.router.triage_stats(),
        "slo": { "deployable": deployable(&gates), "gates": gates },
    }))
}
