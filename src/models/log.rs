use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One persisted record per request. Appended by the Log Sink (C9); never
/// updated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub trace_id: String,
    pub ts: DateTime<Utc>,
    pub api_key_id: Option<i64>,
    pub api_key_name: Option<String>,
    pub requested_model: String,
    pub target_model: Option<String>,
    pub provider_id: Option<i64>,
    pub provider_name: Option<String>,
    pub retry_count: u32,
    pub ttfb_ms: Option<u64>,
    pub total_ms: Option<u64>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub request_headers: Value,
    pub request_body: Value,
    pub response_status: u16,
    pub response_body: Option<Value>,
    pub error: Option<String>,
    pub stream: bool,
}
