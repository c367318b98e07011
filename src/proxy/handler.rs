//! HTTP boundary: the five inbound routes and the axum wiring around the
//! orchestrator. Authenticates, builds an [`IncomingRequest`], and turns
//! an [`OrchestratorOutcome`] into a response with the trace headers.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde_json::Value;

use crate::errors::AppError;
use crate::models::Protocol;
use crate::AppState;

use super::orchestrator::{IncomingRequest, OrchestratorOutcome, RequestMeta};
use super::translate::Endpoint;

const TRACE_ID_HEADER: &str = "x-trace-id";
const TARGET_MODEL_HEADER: &str = "x-target-model";
const PROVIDER_HEADER: &str = "x-provider";

#[tracing::instrument(skip(state, headers, body))]
async fn handle(state: Arc<AppState>, client_protocol: Protocol, endpoint: Endpoint, headers: HeaderMap, body: Bytes) -> Result<Response, AppError> {
    let body: Value = serde_json::from_slice(&body).map_err(|e| AppError::MalformedBody(e.to_string()))?;

    let credential = extract_credential(&headers, client_protocol);
    let principal = match credential {
        Some(cred) => state.key_resolver.resolve(&cred).await,
        None => None,
    };

    let header_map = collect_headers(&headers);
    let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

    let request = IncomingRequest { client_protocol, endpoint, headers: header_map, body, principal, stream };

    match state.orchestrator.handle(request).await? {
        OrchestratorOutcome::Buffered { status, body, meta } => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            let mut response = (status, Json(body)).into_response();
            attach_trace_headers(&mut response, &meta);
            Ok(response)
        }
        OrchestratorOutcome::Streaming { status, body, meta } => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            let stream = tokio_stream::StreamExt::map(body, Ok::<_, std::convert::Infallible>);
            let mut response = Response::builder()
                .status(status)
                .header("content-type", "text/event-stream")
                .body(Body::from_stream(stream))
                .expect("building a streaming response from a fixed status/header set never fails");
            attach_trace_headers(&mut response, &meta);
            Ok(response)
        }
    }
}

fn attach_trace_headers(response: &mut Response, meta: &RequestMeta) {
    let headers = response.headers_mut();
    if let Ok(v) = meta.trace_id.parse() {
        headers.insert(TRACE_ID_HEADER, v);
    }
    if let Some(model) = &meta.target_model {
        if let Ok(v) = model.parse() {
            headers.insert(TARGET_MODEL_HEADER, v);
        }
    }
    if let Some(provider) = &meta.provider_name {
        if let Ok(v) = provider.parse() {
            headers.insert(PROVIDER_HEADER, v);
        }
    }
}

fn extract_credential(headers: &HeaderMap, protocol: Protocol) -> Option<String> {
    match protocol {
        Protocol::OpenAi => headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_start_matches("Bearer ").trim_start_matches("bearer ").to_string()),
        Protocol::Anthropic => headers.get("x-api-key").and_then(|v| v.to_str().ok()).map(|v| v.to_string()),
    }
}

fn collect_headers(headers: &HeaderMap) -> std::collections::HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_ascii_lowercase(), v.to_string())))
        .collect()
}

pub async fn chat_completions(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Result<Response, AppError> {
    handle(state, Protocol::OpenAi, Endpoint::ChatCompletions, headers, body).await
}

pub async fn completions(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Result<Response, AppError> {
    handle(state, Protocol::OpenAi, Endpoint::Completions, headers, body).await
}

pub async fn embeddings(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Result<Response, AppError> {
    handle(state, Protocol::OpenAi, Endpoint::Embeddings, headers, body).await
}

pub async fn messages(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Result<Response, AppError> {
    handle(state, Protocol::Anthropic, Endpoint::Messages, headers, body).await
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}
