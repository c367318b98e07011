//! Proxy Orchestrator (C8): the ten-step request lifecycle from §4.8,
//! composing the rule evaluator, selector, strategy, translator, upstream
//! client, retry engine, and token accountant into one request handling.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{Candidate, LogRecord, Protocol, RuleContext, StrategyKind};
use crate::repo::{Principal, ProviderRepo};
use crate::selection::{self, PriorityStrategy, RoundRobinStrategy, Strategy};
use crate::sink::sanitizer::sanitize_headers;
use crate::sink::LogSink;

use super::retry::{self, AttemptOutcome, RetryConfig, RunResult};
use super::stream_translate::{self, ByteStream};
use super::tokens;
use super::translate::{self, Endpoint};
use super::upstream::{StreamingUpstreamResponse, UpstreamClient, UpstreamResponse};

pub struct IncomingRequest {
    pub client_protocol: Protocol,
    pub endpoint: Endpoint,
    pub headers: HashMap<String, String>,
    pub body: Value,
    pub principal: Option<Principal>,
    pub stream: bool,
}

pub struct RequestMeta {
    pub trace_id: String,
    pub retry_count: u32,
    pub target_model: Option<String>,
    pub provider_name: Option<String>,
}

pub enum OrchestratorOutcome {
    Buffered { status: u16, body: Value, meta: RequestMeta },
    Streaming { status: u16, body: ByteStream, meta: RequestMeta },
}

enum Attempt {
    Buffered { resp: UpstreamResponse },
    Streaming { resp: StreamingUpstreamResponse },
}

impl Attempt {
    fn status(&self) -> u16 {
        match self {
            Attempt::Buffered { resp } => resp.status,
            Attempt::Streaming { resp } => resp.status,
        }
    }
}

pub struct Orchestrator {
    repo: Arc<dyn ProviderRepo>,
    sink: Arc<dyn LogSink>,
    upstream: UpstreamClient,
    round_robin: RoundRobinStrategy,
    priority: PriorityStrategy,
    retry_config: RetryConfig,
}

impl Orchestrator {
    pub fn new(repo: Arc<dyn ProviderRepo>, sink: Arc<dyn LogSink>, http_timeout: Duration, retry_config: RetryConfig) -> Self {
        Self {
            repo,
            sink,
            upstream: UpstreamClient::new(http_timeout),
            round_robin: RoundRobinStrategy::new(),
            priority: PriorityStrategy::new(),
            retry_config,
        }
    }

    fn strategy_for(&self, kind: StrategyKind) -> &dyn Strategy {
        match kind {
            StrategyKind::RoundRobin => &self.round_robin,
            StrategyKind::Priority => &self.priority,
        }
    }

    pub async fn handle(&self, request: IncomingRequest) -> Result<OrchestratorOutcome, AppError> {
        let trace_id = Uuid::new_v4().simple().to_string();
        let span = tracing::info_span!("proxy_request", trace_id = %trace_id);
        let _enter = span.enter();

        let mut log = PendingLog::new(trace_id.clone(), &request);

        let requested_model = match request.body.get("model").and_then(Value::as_str) {
            Some(m) => m.to_string(),
            None => return Err(self.fail(log, AppError::MissingModel).await),
        };
        log.requested_model = requested_model.clone();

        let mapping = match self.repo.get_mapping(&requested_model).await {
            Ok(Some(m)) if m.active => m,
            Ok(Some(_)) => return Err(self.fail(log, AppError::ModelDisabled(requested_model)).await),
            Ok(None) => return Err(self.fail(log, AppError::ModelNotFound(requested_model)).await),
            Err(e) => return Err(self.fail(log, AppError::Internal(e)).await),
        };

        let bindings = match self.repo.get_bindings(&requested_model).await {
            Ok(b) => b,
            Err(e) => return Err(self.fail(log, AppError::Internal(e)).await),
        };
        let providers = match self.repo.get_providers().await {
            Ok(p) => p,
            Err(e) => return Err(self.fail(log, AppError::Internal(e)).await),
        };

        let counting_protocol = bindings
            .iter()
            .min_by_key(|b| b.id)
            .and_then(|b| providers.get(&b.provider_id))
            .map(|p| p.protocol)
            .unwrap_or(Protocol::OpenAi);

        let messages = request.body.get("messages").and_then(Value::as_array).cloned().unwrap_or_default();
        let input_tokens = tokens::count_input_tokens(counting_protocol, &requested_model, &messages);
        log.input_tokens = input_tokens as u32;

        let mut ctx = RuleContext::new(requested_model.clone(), request.headers.clone(), request.body.clone());
        ctx.token_usage.input_tokens = input_tokens as u32;

        let candidates = selection::select(&mapping, &bindings, &providers, &ctx);
        let candidates: Vec<Candidate> = candidates.into_iter().filter(|c| translate::is_supported(request.client_protocol, c.protocol, request.endpoint)).collect();

        if candidates.is_empty() {
            return Err(self.fail(log, AppError::NoAvailableProvider(requested_model)).await);
        }

        let strategy = self.strategy_for(mapping.strategy);
        let upstream = &self.upstream;
        let client_protocol = request.client_protocol;
        let endpoint = request.endpoint;
        let body = request.body.clone();
        let headers = request.headers.clone();
        let want_stream = request.stream;

        let outcome = retry::run(&candidates, &requested_model, strategy, &self.retry_config, || false, |candidate| {
            let body = body.clone();
            let headers = headers.clone();
            async move {
                let (path, translated_body) = translate::translate_request(client_protocol, candidate.protocol, endpoint, &body, &candidate.target_model)
                    .unwrap_or_else(|_| (endpoint.path().to_string(), body.clone()));

                if want_stream {
                    match upstream.forward_streaming(&candidate, &path, &headers, &translated_body).await {
                        Ok(resp) => classify(Attempt::Streaming { resp }),
                        Err(resp) => AttemptOutcome::Transient(Attempt::Buffered { resp }),
                    }
                } else {
                    let resp = upstream.forward_buffered(&candidate, &path, &headers, &translated_body).await;
                    classify(Attempt::Buffered { resp })
                }
            }
        })
        .await;

        match outcome {
            RunResult::NoCandidates => Err(self.fail(log, AppError::NoAvailableProvider(requested_model)).await),
            RunResult::Cancelled { retry_count } => {
                log.retry_count = retry_count;
                self.persist(log, None, None, None, None, Some("client_cancelled".to_string())).await;
                Err(AppError::Internal(anyhow::anyhow!("client cancelled")))
            }
            RunResult::Exhausted { result, candidate, retry_count } => {
                log.retry_count = retry_count;
                log.target_model = Some(candidate.target_model.clone());
                log.provider_id = Some(candidate.provider_id);
                log.provider_name = Some(candidate.provider_name.clone());

                // classify() only ever lands here via Transient exhaustion (0 or
                // >=500) or a NonTransient single-candidate 4xx with no further
                // candidate to advance to; the latter propagates the original
                // status/body instead of a generic 502.
                let status = result.status();
                let non_transient = (400..500).contains(&status);
                match result {
                    Attempt::Buffered { resp } => {
                        let error_text = resp.error.clone();
                        let body_text = resp.body.clone().map(|b| b.to_string());
                        self.persist(log, Some(status), resp.body.clone(), None, None, resp.error.clone()).await;
                        let body = error_text.or(body_text).unwrap_or_default();
                        if non_transient {
                            Err(AppError::UpstreamRejected { status, body })
                        } else {
                            Err(AppError::UpstreamError { status, body })
                        }
                    }
                    Attempt::Streaming { resp } => {
                        let ttfb_ms = resp.ttfb_ms;
                        let total_ms = resp.total_ms.clone();
                        let body = drain_to_string(resp.body).await;
                        self.persist(log, Some(status), None, ttfb_ms.into(), Some(total_ms.load(Ordering::Relaxed)), Some(body.clone())).await;
                        if non_transient {
                            Err(AppError::UpstreamRejected { status, body })
                        } else {
                            Err(AppError::UpstreamError { status, body })
                        }
                    }
                }
            }
            RunResult::Completed { result, candidate, retry_count } => {
                log.retry_count = retry_count;
                log.target_model = Some(candidate.target_model.clone());
                log.provider_id = Some(candidate.provider_id);
                log.provider_name = Some(candidate.provider_name.clone());

                match result {
                    Attempt::Buffered { resp } => {
                        let translated = if client_protocol == candidate.protocol {
                            resp.body.clone().unwrap_or(Value::Null)
                        } else {
                            translate::translate_response(client_protocol, candidate.protocol, &resp.body.clone().unwrap_or(Value::Null), &requested_model).unwrap_or(Value::Null)
                        };

                        let output_tokens = tokens::output_tokens_from_buffered_response(candidate.protocol, &resp.body.clone().unwrap_or(Value::Null));
                        log.output_tokens = output_tokens as u32;

                        let meta = RequestMeta { trace_id: trace_id.clone(), retry_count: log.retry_count, target_model: log.target_model.clone(), provider_name: log.provider_name.clone() };
                        self.persist(log, Some(resp.status), Some(translated.clone()), resp.ttfb_ms.into(), resp.total_ms.into(), None).await;

                        Ok(OrchestratorOutcome::Buffered { status: resp.status, body: translated, meta })
                    }
                    Attempt::Streaming { resp } => {
                        let provider_protocol = candidate.protocol;
                        let total_ms = resp.total_ms.clone();
                        let ttfb_ms = resp.ttfb_ms;
                        let status = resp.status;
                        let sink = self.sink.clone();

                        // translate_stream always emits client_protocol-shaped bytes
                        // (passthrough included, since then the two protocols are
                        // equal) — tap_for_logging must parse that shape, not the
                        // provider's, or the usage match never fires.
                        let translated = stream_translate::translate_stream(client_protocol, provider_protocol, candidate.target_model.clone(), resp.body);
                        let tapped = tap_for_logging(client_protocol, translated, move |output_tokens| {
                            log.output_tokens = output_tokens as u32;
                            log.total_ms = Some(total_ms.load(Ordering::Relaxed));
                            log.ttfb_ms = Some(ttfb_ms);
                            log.response_status = Some(status);
                            let sink = sink.clone();
                            tokio::spawn(async move { log.persist(&sink).await });
                        });

                        let meta = RequestMeta { trace_id: trace_id.clone(), retry_count, target_model: Some(candidate.target_model), provider_name: Some(candidate.provider_name) };
                        Ok(OrchestratorOutcome::Streaming { status, body: tapped, meta })
                    }
                }
            }
        }
    }

    async fn fail(&self, mut log: PendingLog, error: AppError) -> AppError {
        log.error = Some(error.to_string());
        log.response_status = Some(status_for(&error));
        self.persist(log, None, None, None, None, None).await;
        error
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist(&self, mut log: PendingLog, status: Option<u16>, body: Option<Value>, ttfb_ms: Option<u64>, total_ms: Option<u64>, error: Option<String>) {
        if let Some(s) = status {
            log.response_status = Some(s);
        }
        log.response_body = body;
        log.ttfb_ms = ttfb_ms.or(log.ttfb_ms);
        log.total_ms = total_ms.or(log.total_ms);
        log.error = error.or(log.error.take());
        log.persist(&self.sink).await;
    }
}

fn classify(attempt: Attempt) -> AttemptOutcome<Attempt> {
    let status = attempt.status();
    if status == 0 || status >= 500 {
        AttemptOutcome::Transient(attempt)
    } else if status >= 400 {
        AttemptOutcome::NonTransient(attempt)
    } else {
        AttemptOutcome::Success(attempt)
    }
}

fn status_for(error: &AppError) -> u16 {
    match error {
        AppError::MissingModel | AppError::UnsupportedProtocolConversion(_) | AppError::MalformedBody(_) => 400,
        AppError::ModelNotFound(_) => 404,
        AppError::ModelDisabled(_) | AppError::NoAvailableProvider(_) => 503,
        AppError::UpstreamError { status, .. } => *status,
        AppError::UpstreamRejected { status, .. } => *status,
        AppError::InvalidApiKey => 401,
        AppError::Database(_) | AppError::Internal(_) => 500,
    }
}

struct PendingLog {
    trace_id: String,
    ts: chrono::DateTime<Utc>,
    api_key_id: Option<i64>,
    api_key_name: Option<String>,
    requested_model: String,
    target_model: Option<String>,
    provider_id: Option<i64>,
    provider_name: Option<String>,
    retry_count: u32,
    ttfb_ms: Option<u64>,
    total_ms: Option<u64>,
    input_tokens: u32,
    output_tokens: u32,
    request_headers: HashMap<String, String>,
    request_body: Value,
    response_status: Option<u16>,
    response_body: Option<Value>,
    error: Option<String>,
    stream: bool,
}

impl PendingLog {
    fn new(trace_id: String, request: &IncomingRequest) -> Self {
        Self {
            trace_id,
            ts: Utc::now(),
            api_key_id: request.principal.as_ref().map(|p| p.api_key_id),
            api_key_name: request.principal.as_ref().map(|p| p.api_key_name.clone()),
            requested_model: String::new(),
            target_model: None,
            provider_id: None,
            provider_name: None,
            retry_count: 0,
            ttfb_ms: None,
            total_ms: None,
            input_tokens: 0,
            output_tokens: 0,
            request_headers: request.headers.clone(),
            request_body: request.body.clone(),
            response_status: None,
            response_body: None,
            error: None,
            stream: request.stream,
        }
    }

    async fn persist(self, sink: &Arc<dyn LogSink>) {
        let sanitized_headers = sanitize_headers(&self.request_headers);
        let record = LogRecord {
            trace_id: self.trace_id,
            ts: self.ts,
            api_key_id: self.api_key_id,
            api_key_name: self.api_key_name,
            requested_model: self.requested_model,
            target_model: self.target_model,
            provider_id: self.provider_id,
            provider_name: self.provider_name,
            retry_count: self.retry_count,
            ttfb_ms: self.ttfb_ms,
            total_ms: self.total_ms,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            request_headers: serde_json::to_value(sanitized_headers).unwrap_or(Value::Null),
            request_body: self.request_body,
            response_status: self.response_status.unwrap_or(0),
            response_body: self.response_body,
            error: self.error,
            stream: self.stream,
        };
        if let Err(e) = sink.append(record).await {
            tracing::error!(error = %e, "failed to persist log record");
        }
    }
}

/// Drains a streaming attempt's body for error reporting. Only used on the
/// exhausted/rejected path, where the stream is never handed to the client.
/// Capped so a misbehaving upstream that keeps a non-2xx stream open can't
/// grow the error body without bound.
const DRAIN_TO_STRING_CAP: usize = 64 * 1024;

async fn drain_to_string(mut stream: ByteStream) -> String {
    use futures::StreamExt;
    let mut buf = Vec::new();
    while buf.len() < DRAIN_TO_STRING_CAP {
        match stream.next().await {
            Some(chunk) => buf.extend_from_slice(&chunk),
            None => break,
        }
    }
    buf.truncate(DRAIN_TO_STRING_CAP);
    String::from_utf8_lossy(&buf).into_owned()
}

/// Wraps a translated SSE byte stream, scanning each forwarded chunk for a
/// terminal usage figure (C7) and invoking `on_finish` once, when the
/// stream is exhausted, with the best usage value seen (or 0).
fn tap_for_logging(protocol: Protocol, inner: ByteStream, on_finish: impl FnOnce(usize) + Send + 'static) -> ByteStream {
    use futures::stream::{self as fstream, StreamExt};

    struct State {
        inner: ByteStream,
        buf: String,
        best: usize,
        on_finish: Option<Box<dyn FnOnce(usize) + Send>>,
    }

    let state = State { inner, buf: String::new(), best: 0, on_finish: Some(Box::new(on_finish)) };

    Box::pin(fstream::unfold(state, move |mut state| async move {
        match state.inner.next().await {
            Some(chunk) => {
                state.buf.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = state.buf.find("\n\n") {
                    let block: String = state.buf.drain(..pos + 2).collect();
                    for line in block.lines() {
                        if let Some(data) = line.strip_prefix("data:") {
                            if let Ok(value) = serde_json::from_str::<Value>(data.trim_start()) {
                                if let Some(tokens) = tokens::output_tokens_from_stream_event(protocol, &value) {
                                    state.best = tokens;
                                }
                            }
                        }
                    }
                }
                Some((chunk, state))
            }
            None => {
                if let Some(cb) = state.on_finish.take() {
                    cb(state.best);
                }
                None
            }
        }
    }))
}
