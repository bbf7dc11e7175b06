// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Cost/quality-aware request router for LLM providers.
#[derive(Parser, Debug)]
#[command(name = "mimir", version, about)]
pub struct Cli {
    /// Path to an explicit config file (merged over discovered configs).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr (RUST_LOG controls the filter).
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP router (the default when no subcommand is given).
    Serve,

    /// Print the routing decision for a prompt as JSON, without calling
    /// any provider. Operator debugging for "where would this go?".
    Route {
        /// The prompt text to route.
        prompt: String,
        /// Simulate an explicit model override instead of `auto`.
        #[arg(long)]
        model: Option<String>,
    },

    /// Print the merged effective configuration and exit.
    ShowConfig,

    /// Evaluate the SLO gates against the current windows and print the
    /// results. Mostly useful for validating gate configuration.
    Check,
}
