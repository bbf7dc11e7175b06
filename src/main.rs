// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;
mod server;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use mimir_core::Router;
use mimir_provider::{ChatMessage, ChatRequest, RequestHeaders};
use server::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = mimir_config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::ShowConfig => {
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
        Commands::Route { prompt, model } => {
            let router = Router::new(config);
            router.refresh_artifact().await;
            let req = ChatRequest {
                model: model.or_else(|| Some("auto".into())),
                messages: vec![ChatMessage::new("user", prompt)],
                ..Default::default()
            };
            match router.decide(&req, &RequestHeaders::new()).await {
                Ok((decision, features)) => {
                    let out = serde_json::json!({
                        "decision": decision,
                        "features": features,
                    });
                    println!("{}", serde_json::to_string_pretty(&out)?);
                    Ok(())
                }
                Err(e) => {
                    eprintln!("route failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Check => {
            let router = Router::new(config);
            let mut stats = router.observer().stats();
            stats.live_cooldowns = router.cooldowns().live_count();
            let gates = mimir_observe::evaluate(&stats, &router.config().observability.slo);
            println!("{}", serde_json::to_string_pretty(&gates)?);
            if !mimir_observe::deployable(&gates) {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Serve => serve(config).await,
    }
}

async fn serve(config: mimir_config::Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen_addr.clone();
    let reload_secs = config.tuning.reload_seconds.max(1);

    let router = Arc::new(Router::new(config));
    router.refresh_artifact().await;

    // Background artifact reload; failures keep the current artifact.
    {
        let router = router.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(reload_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                router.refresh_artifact().await;
            }
        });
    }

    // Cool-down housekeeping.
    {
        let router = router.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                router.cooldowns().purge_expired();
            }
        });
    }

    // SLO watch: warn on blocking-gate failures and notify the alert
    // webhook when one is configured.
    {
        let router = router.clone();
        tokio::spawn(async move {
            let client = reqwest::Client::new();
            let mut ticker = tokio::time::interval(Duration::from_secs(300));
            loop {
                ticker.tick().await;
                let mut stats = router.observer().stats();
                stats.live_cooldowns = router.cooldowns().live_count();
                let gates =
                    mimir_observe::evaluate(&stats, &router.config().observability.slo);
                if mimir_observe::deployable(&gates) {
                    continue;
                }
                tracing::warn!(?gates, "blocking SLO gate failing");
                if let Some(url) = &router.config().observability.alerts.webhook_url {
                    let body = serde_json::json!({ "source": "mimir", "gates": gates });
                    if let Err(e) = client.post(url).json(&body).send().await {
                        tracing::warn!(error = %e, "alert webhook unreachable");
                    }
                }
            }
        });
    }

    // Dedicated stats listener, when configured.
    if router.config().observability.dashboard_port != 0 {
        let addr = format!("127.0.0.1:{}", router.config().observability.dashboard_port);
        let app = server::dashboard_app(AppState {
            router: router.clone(),
        });
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding dashboard {addr}"))?;
        tracing::info!(%addr, "dashboard listening");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
    }

    let app = server::app(AppState { router });
    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("binding {listen_addr}"))?;
    tracing::info!(%listen_addr, "mimir listening");
    axum::serve(listener, app).await.context("server exited")?;
    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { "info" })
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
