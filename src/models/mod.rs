//! Core data model: providers, mappings, bindings, candidates, rules, log records.

pub mod candidate;
pub mod log;
pub mod provider;
pub mod rule;

pub use candidate::Candidate;
pub use log::LogRecord;
pub use provider::{ModelMapping, Protocol, Provider, ProviderBinding, StrategyKind};
pub use rule::{Logic, Operator, Rule, RuleContext, RuleSet, TokenUsage};
