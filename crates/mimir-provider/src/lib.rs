// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod auth;
pub mod oauth;
mod aggregator;
mod anthropic;
mod driver;
mod error;
mod gemini;
mod health;
mod openai;
mod types;

pub use aggregator::AggregatorDriver;
pub use anthropic::AnthropicDriver;
pub use auth::{AuthAdapter, AuthRegistry, CredentialKind, Credentials};
pub use driver::ProviderDriver;
pub use error::{ErrorKind, ProviderError};
pub use gemini::GeminiDriver;
pub use health::{HealthRegistry, HealthStatus};
pub use oauth::{challenge, generate_verifier, OauthError, PkceFlow};
pub use openai::OpenaiDriver;
pub use types::*;

use std::collections::HashMap;
use std::sync::Arc;

use mimir_catalog::ProviderKind;

/// The default driver set: one driver per provider kind, production
/// endpoints. Tests substitute their own map.
pub fn default_drivers() -> HashMap<ProviderKind, Arc<dyn ProviderDriver>> {
    let mut drivers: HashMap<ProviderKind, Arc<dyn ProviderDriver>> = HashMap::new();
    drivers.insert(ProviderKind::Anthropic, Arc::new(AnthropicDriver::new(None)));
    drivers.insert(ProviderKind::Openai, Arc::new(OpenaiDriver::new(None)));
    drivers.insert(ProviderKind::Gemini, Arc::new(GeminiDriver::new(None)));
    drivers.insert(ProviderKind::Aggregator, Arc::new(AggregatorDriver::new(None)));
    drivers
}
