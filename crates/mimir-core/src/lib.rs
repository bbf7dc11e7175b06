// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The routing core: the `Router` value, the decision pipeline, the
//! execution engine with typed fallback, and the host plugin boundary.
mod engine;
mod error;
mod plugin;
mod router;

pub use engine::ExecutionMeta;
pub use error::RouteError;
pub use plugin::{
    PluginChain, PluginContext, PluginDeny, PreHookOutcome, RoutePlugin, RouterPlugin,
};
pub use router::Router;
