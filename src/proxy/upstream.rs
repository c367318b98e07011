//! Upstream Client (C5): forwards a translated request to a candidate's
//! provider, strips/injects headers, and times TTFB/total.
//!
//! Retries are not this module's concern; a single `forward_*` call is one
//! attempt. The retry/failover state machine lives in [`super::retry`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde_json::Value;

use crate::models::{Candidate, Protocol};

use super::stream_translate::ByteStream;

const STRIPPED_HEADERS: &[&str] = &["host", "content-length", "content-encoding", "accept-encoding", "connection", "transfer-encoding"];

/// Result of a single buffered forward attempt. `status == 0` marks a
/// network-level failure (timeout, DNS, TLS, connection reset) — the
/// retry engine treats this the same as a 5xx.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
    pub raw_body: Option<Bytes>,
    pub ttfb_ms: u64,
    pub total_ms: u64,
    pub error: Option<String>,
}

impl UpstreamResponse {
    pub fn is_transient(&self) -> bool {
        self.status == 0 || self.status >= 500
    }

    fn network_error(message: String, elapsed: Duration) -> Self {
        let ms = elapsed.as_millis() as u64;
        UpstreamResponse { status: 0, headers: HashMap::new(), body: None, raw_body: None, ttfb_ms: ms, total_ms: ms, error: Some(message) }
    }
}

/// Response to a streaming forward. `total_ms` is filled in once the
/// caller has fully drained `body`.
pub struct StreamingUpstreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: ByteStream,
    pub ttfb_ms: u64,
    pub total_ms: Arc<AtomicU64>,
}

pub struct UpstreamClient {
    client: Client,
}

impl UpstreamClient {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(32)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("failed to build HTTP client");
        Self { client }
    }

    pub async fn forward_buffered(
        &self,
        candidate: &Candidate,
        path: &str,
        client_headers: &HashMap<String, String>,
        body: &Value,
    ) -> UpstreamResponse {
        let started = Instant::now();
        let url = format!("{}{}", candidate.base_url.trim_end_matches('/'), path);
        let headers = build_headers(client_headers, candidate);

        let result = self.client.post(&url).headers(headers).json(body).send().await;
        match result {
            Ok(resp) => {
                let ttfb_ms = started.elapsed().as_millis() as u64;
                let status = resp.status().as_u16();
                let headers = collect_headers(resp.headers());
                let bytes = match resp.bytes().await {
                    Ok(b) => b,
                    Err(e) => return UpstreamResponse::network_error(e.to_string(), started.elapsed()),
                };
                let total_ms = started.elapsed().as_millis() as u64;
                let parsed: Option<Value> = serde_json::from_slice(&bytes).ok();
                let raw_body = if parsed.is_none() { Some(bytes) } else { None };
                UpstreamResponse { status, headers, body: parsed, raw_body, ttfb_ms, total_ms, error: None }
            }
            Err(e) => UpstreamResponse::network_error(e.to_string(), started.elapsed()),
        }
    }

    pub async fn forward_streaming(
        &self,
        candidate: &Candidate,
        path: &str,
        client_headers: &HashMap<String, String>,
        body: &Value,
    ) -> Result<StreamingUpstreamResponse, UpstreamResponse> {
        let started = Instant::now();
        let url = format!("{}{}", candidate.base_url.trim_end_matches('/'), path);
        let headers = build_headers(client_headers, candidate);

        let resp = self
            .client
            .post(&url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| UpstreamResponse::network_error(e.to_string(), started.elapsed()))?;

        let ttfb_ms = started.elapsed().as_millis() as u64;
        let status = resp.status().as_u16();
        let headers_map = collect_headers(resp.headers());

        let total_ms = Arc::new(AtomicU64::new(0));
        let total_ms_for_stream = total_ms.clone();
        let byte_stream = resp.bytes_stream();

        let timed = stream::unfold((byte_stream, started, total_ms_for_stream, false), |(mut inner, started, total_ms, done)| async move {
            if done {
                return None;
            }
            match inner.next().await {
                Some(Ok(chunk)) => Some((chunk, (inner, started, total_ms, false))),
                Some(Err(_)) | None => {
                    total_ms.store(started.elapsed().as_millis() as u64, Ordering::Relaxed);
                    None
                }
            }
        });

        Ok(StreamingUpstreamResponse { status, headers: headers_map, body: Box::pin(timed), ttfb_ms, total_ms })
    }
}

fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect()
}

fn build_headers(client_headers: &HashMap<String, String>, candidate: &Candidate) -> HeaderMap {
    let client_bound_auth = match candidate.protocol {
        Protocol::OpenAi => "authorization",
        Protocol::Anthropic => "x-api-key",
    };

    let mut headers = HeaderMap::new();
    for (name, value) in client_headers {
        let lower = name.to_ascii_lowercase();
        if STRIPPED_HEADERS.contains(&lower.as_str()) || lower == client_bound_auth {
            continue;
        }
        if let (Ok(header_name), Ok(header_value)) = (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
            headers.insert(header_name, header_value);
        }
    }

    let api_key = candidate.api_key.as_deref().unwrap_or("");
    match candidate.protocol {
        Protocol::OpenAi => {
            if let Ok(v) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
                headers.insert(reqwest::header::AUTHORIZATION, v);
            }
        }
        Protocol::Anthropic => {
            if let Ok(v) = HeaderValue::from_str(api_key) {
                headers.insert(HeaderName::from_static("x-api-key"), v);
            }
            headers.insert(HeaderName::from_static("anthropic-version"), HeaderValue::from_static("2023-06-01"));
        }
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn candidate(base_url: String, protocol: Protocol) -> Candidate {
        Candidate {
            binding_id: 1,
            provider_id: 1,
            provider_name: "p".into(),
            base_url,
            protocol,
            api_key: Some("sk-test-key".into()),
            target_model: "gpt-4-0613".into(),
            priority: 0,
            weight: 1,
        }
    }

    #[tokio::test]
    async fn injects_bearer_auth_for_openai_and_strips_hop_by_hop() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(Duration::from_secs(5));
        let mut client_headers = HashMap::new();
        client_headers.insert("authorization".to_string(), "Bearer client-key".to_string());
        client_headers.insert("host".to_string(), "localhost".to_string());
        client_headers.insert("x-custom".to_string(), "value".to_string());

        let resp = client
            .forward_buffered(&candidate(server.uri(), Protocol::OpenAi), "/v1/chat/completions", &client_headers, &serde_json::json!({}))
            .await;

        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, Some(serde_json::json!({"ok": true})));
        assert!(!resp.is_transient());
    }

    #[tokio::test]
    async fn injects_x_api_key_and_version_for_anthropic() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-test-key"))
            .and(header("anthropic-version", "2023-06-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(Duration::from_secs(5));
        let resp = client
            .forward_buffered(&candidate(server.uri(), Protocol::Anthropic), "/v1/messages", &HashMap::new(), &serde_json::json!({}))
            .await;

        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn network_failure_maps_to_status_zero() {
        let client = UpstreamClient::new(Duration::from_millis(50));
        let resp = client
            .forward_buffered(&candidate("http://127.0.0.1:1".into(), Protocol::OpenAi), "/v1/chat/completions", &HashMap::new(), &serde_json::json!({}))
            .await;
        assert_eq!(resp.status, 0);
        assert!(resp.is_transient());
        assert!(resp.error.is_some());
    }

    #[tokio::test]
    async fn upstream_5xx_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/v1/chat/completions")).respond_with(ResponseTemplate::new(503)).mount(&server).await;

        let client = UpstreamClient::new(Duration::from_secs(5));
        let resp = client
            .forward_buffered(&candidate(server.uri(), Protocol::OpenAi), "/v1/chat/completions", &HashMap::new(), &serde_json::json!({}))
            .await;
        assert_eq!(resp.status, 503);
        assert!(resp.is_transient());
    }
}
