// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Plugin boundary for host gateways.
//!
//! Hosts that embed the router as a plugin drive it through three
//! methods: `pre_hook` (may mutate the request or short-circuit),
//! `post_hook` (always runs for each pre-hook that ran, in reverse
//! registration order), and `cleanup`. Implementations must be
//! reentrant; the chain holds no per-request state outside the context
//! value passed through the hooks.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use mimir_provider::{ChatRequest, RequestHeaders};

use crate::router::Router;

pub struct PluginContext {
    pub request_id: String,
    pub headers: RequestHeaders,
    /// Scratch values plugins pass between their own pre and post hooks.
    pub values: HashMap<String, Value>,
}

impl PluginContext {
    pub fn new(request_id: impl Into<String>, headers: RequestHeaders) -> Self {
        Self {
            request_id: request_id.into(),
            headers,
            values: HashMap::new(),
        }
    }
}

/// A deny produced by a short-circuiting pre-hook.
#[derive(Debug, Clone)]
pub struct PluginDeny {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub enum PreHookOutcome {
    /// Continue down the chain with the (possibly rewritten) request.
    Continue(ChatRequest),
    /// Stop the chain and answer immediately.
    ShortCircuit {
        response: Option<Value>,
        error: Option<PluginDeny>,
        /// Deny short-circuits must set this to `false`: the host may
        /// not route around a policy decision.
        allow_fallbacks: bool,
    },
}

#[async_trait]
pub trait RouterPlugin: Send + Sync {
    fn name(&self) -> &str;

    async fn pre_hook(
        &self,
        ctx: &mut PluginContext,
        req: ChatRequest,
    ) -> anyhow::Result<PreHookOutcome>;

    /// Runs for every pre-hook that ran, in reverse order, whether the
    /// request succeeded or not.
    async fn post_hook(
        &self,
        _ctx: &mut PluginContext,
        response: Option<Value>,
        error: Option<Value>,
    ) -> anyhow::Result<(Option<Value>, Option<Value>)> {
        Ok((response, error))
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// An ordered plugin chain: pre-hooks run in registration order,
/// post-hooks in reverse, and only for plugins whose pre-hook ran.
#[derive(Default)]
pub struct PluginChain {
    plugins: Vec<Arc<dyn RouterPlugin>>,
}

impl PluginChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, plugin: Arc<dyn RouterPlugin>) {
        self.plugins.push(plugin);
    }

    /// Run pre-hooks until one short-circuits or the chain ends.
    ///
    /// Returns the outcome and how many pre-hooks ran; pass that count
    /// to [`run_post`][Self::run_post].
    pub async fn run_pre(
        &self,
        ctx: &mut PluginContext,
        mut req: ChatRequest,
    ) -> anyhow::Result<(PreHookOutcome, usize)> {
        for (i, plugin) in self.plugins.iter().enumerate() {
            match plugin.pre_hook(ctx, req).await? {
                PreHookOutcome::Continue(next) => req = next,
                short_circuit => return Ok((short_circuit, i + 1)),
            }
        }
        Ok((PreHookOutcome::Continue(req), self.plugins.len()))
    }

    /// Run post-hooks in reverse for the `ran` plugins whose pre-hook
    /// executed.
    pub async fn run_post(
        &self,
        ctx: &mut PluginContext,
        mut response: Option<Value>,
        mut error: Option<Value>,
        ran: usize,
    ) -> anyhow::Result<(Option<Value>, Option<Value>)> {
        for plugin in self.plugins.iter().take(ran).rev() {
            (response, error) = plugin.post_hook(ctx, response, error).await?;
        }
        Ok((response, error))
    }

    pub async fn cleanup(&self) -> anyhow::Result<()> {
        for plugin in &self.plugins {
            plugin.cleanup().await?;
        }
        Ok(())
    }
}

/// The router itself, as a plugin: its pre-hook runs the decision
/// pipeline and rewrites the request's model; denials short-circuit with
/// host fallbacks disallowed.
pub struct RoutePlugin {
    router: Arc<Router>,
}

impl RoutePlugin {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl RouterPlugin for RoutePlugin {
    fn name(&self) -> &str {
        "mimir-route"
    }

    async fn pre_hook(
        &self,
        ctx: &mut PluginContext,
        req: ChatRequest,
    ) -> anyhow::Result<PreHookOutcome> {
        match self.router.decide(&req, &ctx.headers).await {
            Ok((decision, _features)) => {
                let mut rewritten = req;
                rewritten.model = Some(decision.model.clone());
                ctx.values.insert(
                    "mimir.decision".into(),
                    serde_json::to_value(&decision)?,
                );
                Ok(PreHookOutcome::Continue(rewritten))
            }
            Err(e) => Ok(PreHookOutcome::ShortCircuit {
                response: None,
                error: Some(PluginDeny {
                    code: e.code().to_string(),
                    message: e.to_string(),
                }),
                allow_fallbacks: false,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct TracePlugin {
        id: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        short_circuit: bool,
    }

    #[async_trait]
    impl RouterPlugin for TracePlugin {
        fn name(&self) -> &str {
            self.id
        }

        async fn pre_hook(
            &self,
            _ctx: &mut PluginContext,
            req: ChatRequest,
        ) -> anyhow::Result<PreHookOutcome> {
            self.log.lock().unwrap().push(format!("pre:{}", self.id));
            if self.short_circuit {
                return Ok(PreHookOutcome::ShortCircuit {
                    response: None,
                    error: Some(PluginDeny {
                        code: "denied".into(),
                        message: "policy".into(),
                    }),
                    allow_fallbacks: false,
                });
            }
            Ok(PreHookOutcome::Continue(req))
        }

        async fn post_hook(
            &self,
            _ctx: &mut PluginContext,
            response: Option<Value>,
            error: Option<Value>,
        ) -> anyhow::Result<(Option<Value>, Option<Value>)> {
            self.log.lock().unwrap().push(format!("post:{}", self.id));
            Ok((response, error))
        }
    }

    fn chain_of(
        specs: &[(&'static str, bool)],
    ) -> (PluginChain, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = PluginChain::new();
        for &(id, sc) in specs {
            chain.push(Arc::new(TracePlugin {
                id,
                log: log.clone(),
                short_circuit: sc,
            }));
        }
        (chain, log)
    }

    fn request() -> ChatRequest {
        ChatRequest {
            messages: vec![mimir_provider::ChatMessage::new("user", "hi")],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn pre_hooks_run_in_order_post_hooks_in_reverse() {
        let (chain, log) = chain_of(&[("a", false), ("b", false), ("c", false)]);
        let mut ctx = PluginContext::new("r1", RequestHeaders::new());
        let (_, ran) = chain.run_pre(&mut ctx, request()).await.unwrap();
        assert_eq!(ran, 3);
        chain.run_post(&mut ctx, None, None, ran).await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["pre:a", "pre:b", "pre:c", "post:c", "post:b", "post:a"]
        );
    }

    #[tokio::test]
    async fn short_circuit_stops_chain_and_limits_post_hooks() {
        let (chain, log) = chain_of(&[("a", false), ("b", true), ("c", false)]);
        let mut ctx = PluginContext::new("r1", RequestHeaders::new());
        let (outcome, ran) = chain.run_pre(&mut ctx, request()).await.unwrap();
        assert_eq!(ran, 2);
        match outcome {
            PreHookOutcome::ShortCircuit {
                allow_fallbacks, ..
            } => assert!(!allow_fallbacks, "deny must disallow host fallbacks"),
            other => panic!("expected short circuit, got {other:?}"),
        }
        chain.run_post(&mut ctx, None, None, ran).await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["pre:a", "pre:b", "post:b", "post:a"],
            "c's post hook must not run — its pre hook never ran"
        );
    }

    #[tokio::test]
    async fn empty_chain_continues_with_request() {
        let chain = PluginChain::new();
        let mut ctx = PluginContext::new("r1", RequestHeaders::new());
        let (outcome, ran) = chain.run_pre(&mut ctx, request()).await.unwrap();
        assert_eq!(ran, 0);
        assert!(matches!(outcome, PreHookOutcome::Continue(_)));
    }
}
