//! Log Sink + Sanitizer (C9): append-only persistence for [`LogRecord`]s
//! and the credential masking applied before a record is written.

pub mod memory;
pub mod postgres;
pub mod sanitizer;

use async_trait::async_trait;

use crate::models::LogRecord;

/// Append-only log storage. Implementations never update existing rows.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn append(&self, record: LogRecord) -> anyhow::Result<()>;

    /// Delete records older than `days`; returns the number of rows
    /// removed. Must be safe to call again after a prior failure.
    async fn delete_older_than(&self, days: u32) -> anyhow::Result<u64>;
}

pub use memory::InMemoryLogSink;
pub use postgres::PostgresLogSink;
