//! In-memory [`LogSink`]: used by tests and by the dependency-free
//! standalone run (no `DATABASE_URL` configured).

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};

use crate::models::LogRecord;

use super::LogSink;

#[derive(Default)]
pub struct InMemoryLogSink {
    records: Mutex<Vec<LogRecord>>,
}

impl InMemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().expect("log sink mutex poisoned").clone()
    }
}

#[async_trait]
impl LogSink for InMemoryLogSink {
    async fn append(&self, record: LogRecord) -> anyhow::Result<()> {
        self.records.lock().expect("log sink mutex poisoned").push(record);
        Ok(())
    }

    async fn delete_older_than(&self, days: u32) -> anyhow::Result<u64> {
        let cutoff = Utc::now() - ChronoDuration::days(days as i64);
        let mut records = self.records.lock().expect("log sink mutex poisoned");
        let before = records.len();
        records.retain(|r| r.ts >= cutoff);
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn record(ts: chrono::DateTime<Utc>) -> LogRecord {
        LogRecord {
            trace_id: "t".into(),
            ts,
            api_key_id: None,
            api_key_name: None,
            requested_model: "gpt-4".into(),
            target_model: None,
            provider_id: None,
            provider_name: None,
            retry_count: 0,
            ttfb_ms: None,
            total_ms: None,
            input_tokens: 0,
            output_tokens: 0,
            request_headers: json!({}),
            request_body: json!({}),
            response_status: 200,
            response_body: None,
            error: None,
            stream: false,
        }
    }

    #[tokio::test]
    async fn append_and_delete_older_than() {
        let sink = InMemoryLogSink::new();
        sink.append(record(Utc::now() - Duration::days(40))).await.unwrap();
        sink.append(record(Utc::now())).await.unwrap();

        let deleted = sink.delete_older_than(30).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(sink.records().len(), 1);
    }

    #[tokio::test]
    async fn delete_is_idempotent_on_empty_sink() {
        let sink = InMemoryLogSink::new();
        assert_eq!(sink.delete_older_than(30).await.unwrap(), 0);
    }
}
