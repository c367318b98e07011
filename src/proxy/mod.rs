//! The proxy request pipeline: protocol translation (C4), the upstream
//! client (C5), the retry/failover engine (C6), token accounting (C7),
//! the orchestrator (C8), and the HTTP handler that wires them together.

pub mod handler;
pub mod orchestrator;
pub mod retry;
pub mod stream_translate;
pub mod tokens;
pub mod translate;
pub mod upstream;
