//! relaycore — multi-tenant LLM proxy gateway core.
//!
//! Library crate so integration tests in `tests/` can exercise the
//! orchestrator directly, without going through a bound socket.

use std::sync::Arc;

pub mod cli;
pub mod config;
pub mod errors;
pub mod models;
pub mod proxy;
pub mod repo;
pub mod rules;
pub mod scheduler;
pub mod selection;
pub mod sink;

use proxy::orchestrator::Orchestrator;
use repo::KeyResolver;

/// Shared application state passed to every handler.
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub key_resolver: Arc<dyn KeyResolver>,
}
