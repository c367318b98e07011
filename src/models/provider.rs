use serde::{Deserialize, Serialize};

use super::rule::RuleSet;

/// The wire shape a provider speaks. Drives both header injection (C5)
/// and protocol translation (C4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    OpenAi,
    Anthropic,
}

/// A configured upstream. Lifecycle (create/disable) is owned by the admin
/// surface; the core only ever reads a snapshot taken at request start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: i64,
    pub name: String,
    pub base_url: String,
    pub protocol: Protocol,
    pub api_key: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    RoundRobin,
    Priority,
}

/// A `requested_model` clients send, and how it should be routed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMapping {
    pub requested_model: String,
    pub strategy: StrategyKind,
    pub matching_rules: Option<RuleSet>,
    pub active: bool,
}

/// One (model, provider, target_model) edge. Multiple bindings per model
/// are expected; the candidate list for a request is derived from them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderBinding {
    pub id: i64,
    pub requested_model: String,
    pub provider_id: i64,
    pub target_model: String,
    pub provider_rules: Option<RuleSet>,
    pub priority: i32,
    pub weight: i64,
    pub active: bool,
}
