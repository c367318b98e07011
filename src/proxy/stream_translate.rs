//! Streaming SSE Translator (C4, streaming half): a pull-based,
//! single-event-buffered transducer between OpenAI-shaped and
//! Anthropic-shaped server-sent-event streams.
//!
//! Naming follows the direction of the *data*, not the request: an
//! "OpenAI -> Anthropic" stream is produced by an OpenAI provider and
//! consumed by an Anthropic client.

use std::collections::{HashSet, VecDeque};
use std::pin::Pin;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::Protocol;

pub type ByteStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// Dispatch to the direction-specific transducer, or pass through
/// untouched when client and provider share a protocol.
pub fn translate_stream(client_protocol: Protocol, provider_protocol: Protocol, model: String, input: ByteStream) -> ByteStream {
    match (client_protocol, provider_protocol) {
        (a, b) if a == b => input,
        (Protocol::Anthropic, Protocol::OpenAi) => openai_provider_to_anthropic_client(model, input),
        (Protocol::OpenAi, Protocol::Anthropic) => anthropic_provider_to_openai_client(model, input),
        _ => input,
    }
}

/// Extract complete `data:`-bearing SSE blocks (terminated by a blank
/// line) from `buf`, leaving any trailing partial block in place.
fn drain_complete_blocks(buf: &mut String) -> Vec<String> {
    let mut out = Vec::new();
    loop {
        let Some(pos) = buf.find("\n\n") else { break };
        let block: String = buf.drain(..pos + 2).collect();
        let data_lines: Vec<&str> = block
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|rest| rest.trim_start())
            .collect();
        if !data_lines.is_empty() {
            out.push(data_lines.join("\n"));
        }
    }
    out
}

fn openai_chunk_bytes(id: &str, model: &str, delta: Value, finish_reason: Option<&str>) -> Bytes {
    let obj = json!({
        "id": id,
        "object": "chat.completion.chunk",
        "model": model,
        "choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}],
    });
    Bytes::from(format!("data: {obj}\n\n"))
}

fn openai_done_bytes() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

/// A trailing usage-only chunk (empty `choices`), matching the shape real
/// OpenAI streams emit when usage reporting is requested.
fn openai_usage_chunk_bytes(id: &str, model: &str, completion_tokens: u64, input_tokens: Option<usize>) -> Bytes {
    let prompt_tokens = input_tokens.unwrap_or(0) as u64;
    let obj = json!({
        "id": id,
        "object": "chat.completion.chunk",
        "model": model,
        "choices": [],
        "usage": {
            "prompt_tokens": prompt_tokens,
            "completion_tokens": completion_tokens,
            "total_tokens": prompt_tokens + completion_tokens,
        },
    });
    Bytes::from(format!("data: {obj}\n\n"))
}

fn anthropic_event_bytes(event_type: &str, data: Value) -> Bytes {
    Bytes::from(format!("event: {event_type}\ndata: {data}\n\n"))
}

fn stop_reason_to_finish_reason(stop_reason: &str) -> &'static str {
    match stop_reason {
        "end_turn" => "stop",
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        _ => "stop",
    }
}

// ── OpenAI provider -> Anthropic client ──────────────────────────

#[derive(Default)]
struct O2AState {
    started: bool,
    message_id: String,
    text_block_open: bool,
    tool_blocks: HashSet<i64>,
    finish_handled: bool,
    pending_message_delta: Option<Value>,
    finalized: bool,
    /// Real completion-token count, captured from the usage chunk OpenAI
    /// sends (empty `choices`, populated `usage`) when the upstream call
    /// requested `stream_options.include_usage`. Patched into the pending
    /// `message_delta` at flush time since that usage chunk typically
    /// arrives one chunk after the `finish_reason` that queues it.
    output_tokens: Option<usize>,
}

/// Flushes a queued `message_delta`, stamping in whatever output-token
/// count has been observed by now.
fn flush_pending_message_delta(ctx: &mut O2AState, queue: &mut VecDeque<Bytes>) {
    if let Some(mut pending) = ctx.pending_message_delta.take() {
        if let Some(usage) = pending.get_mut("usage").and_then(Value::as_object_mut) {
            usage.insert("output_tokens".into(), json!(ctx.output_tokens.unwrap_or(0)));
        }
        queue.push_back(anthropic_event_bytes("message_delta", pending));
    }
}

fn handle_openai_chunk(data: &str, model: &str, ctx: &mut O2AState, queue: &mut VecDeque<Bytes>) {
    if data.trim() == "[DONE]" {
        finalize_o2a(ctx, queue);
        return;
    }

    let Ok(value) = serde_json::from_str::<Value>(data) else { return };

    if let Some(tokens) = value.get("usage").and_then(|u| u.get("completion_tokens")).and_then(Value::as_u64) {
        ctx.output_tokens = Some(tokens as usize);
    }

    flush_pending_message_delta(ctx, queue);

    let Some(choice) = value.get("choices").and_then(Value::as_array).and_then(|a| a.first()) else { return };

    if !ctx.started {
        ctx.started = true;
        ctx.message_id = format!("msg_{}", Uuid::new_v4().simple());
        queue.push_back(anthropic_event_bytes(
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": ctx.message_id, "type": "message", "role": "assistant", "model": model,
                    "content": [], "stop_reason": Value::Null, "stop_sequence": Value::Null,
                    "usage": {"input_tokens": 0, "output_tokens": 0},
                }
            }),
        ));
        queue.push_back(anthropic_event_bytes(
            "content_block_start",
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        ));
        ctx.text_block_open = true;
    }

    if let Some(delta) = choice.get("delta") {
        if let Some(content) = delta.get("content").and_then(Value::as_str) {
            if !content.is_empty() {
                queue.push_back(anthropic_event_bytes(
                    "content_block_delta",
                    json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": content}}),
                ));
            }
        }
        if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
            for tc in tool_calls {
                let tool_index = tc.get("index").and_then(Value::as_i64).unwrap_or(0);
                let block_index = tool_index + 1;
                if !ctx.tool_blocks.contains(&block_index) {
                    ctx.tool_blocks.insert(block_index);
                    let id = tc.get("id").and_then(Value::as_str).unwrap_or("");
                    let name = tc.get("function").and_then(|f| f.get("name")).and_then(Value::as_str).unwrap_or("");
                    queue.push_back(anthropic_event_bytes(
                        "content_block_start",
                        json!({"type": "content_block_start", "index": block_index, "content_block": {"type": "tool_use", "id": id, "name": name, "input": {}}}),
                    ));
                }
                if let Some(args) = tc.get("function").and_then(|f| f.get("arguments")).and_then(Value::as_str) {
                    queue.push_back(anthropic_event_bytes(
                        "content_block_delta",
                        json!({"type": "content_block_delta", "index": block_index, "delta": {"type": "input_json_delta", "partial_json": args}}),
                    ));
                }
            }
        }
    }

    if let Some(finish_reason) = choice.get("finish_reason").and_then(Value::as_str) {
        if !ctx.finish_handled {
            ctx.finish_handled = true;
            if ctx.text_block_open {
                queue.push_back(anthropic_event_bytes("content_block_stop", json!({"type": "content_block_stop", "index": 0})));
            }
            for idx in ctx.tool_blocks.iter().copied().collect::<Vec<_>>() {
                queue.push_back(anthropic_event_bytes("content_block_stop", json!({"type": "content_block_stop", "index": idx})));
            }
            let stop_reason = stop_reason_to_finish_reason(finish_reason);
            ctx.pending_message_delta = Some(json!({
                "type": "message_delta",
                "delta": {"stop_reason": stop_reason, "stop_sequence": Value::Null},
                "usage": {"output_tokens": 0},
            }));
        }
    }
}

fn finalize_o2a(ctx: &mut O2AState, queue: &mut VecDeque<Bytes>) {
    if ctx.finalized {
        return;
    }
    ctx.finalized = true;
    flush_pending_message_delta(ctx, queue);
    queue.push_back(anthropic_event_bytes("message_stop", json!({"type": "message_stop"})));
}

fn openai_provider_to_anthropic_client(model: String, input: ByteStream) -> ByteStream {
    struct State {
        input: ByteStream,
        buf: String,
        queue: VecDeque<Bytes>,
        ctx: O2AState,
        model: String,
        input_done: bool,
    }

    let state = State { input, buf: String::new(), queue: VecDeque::new(), ctx: O2AState::default(), model, input_done: false };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(bytes) = state.queue.pop_front() {
                return Some((bytes, state));
            }
            if state.input_done {
                if state.ctx.finalized {
                    return None;
                }
                finalize_o2a(&mut state.ctx, &mut state.queue);
                continue;
            }
            match state.input.next().await {
                Some(bytes) => {
                    state.buf.push_str(&String::from_utf8_lossy(&bytes));
                    let blocks = drain_complete_blocks(&mut state.buf);
                    for block in blocks {
                        handle_openai_chunk(&block, &state.model, &mut state.ctx, &mut state.queue);
                    }
                }
                None => state.input_done = true,
            }
        }
    }))
}

// ── Anthropic provider -> OpenAI client ──────────────────────────

#[derive(Default)]
struct A2OState {
    completion_id: String,
    role_emitted: bool,
    done_sent: bool,
    /// Input tokens from `message_start`'s usage block, carried through to
    /// the synthesized trailing usage chunk if the provider reports one.
    input_tokens: Option<usize>,
}

fn push_delta(ctx: &mut A2OState, model: &str, queue: &mut VecDeque<Bytes>, delta: Value) {
    let mut delta = delta;
    if !ctx.role_emitted {
        ctx.role_emitted = true;
        if let Some(obj) = delta.as_object_mut() {
            obj.insert("role".into(), json!("assistant"));
        }
    }
    let id = if ctx.completion_id.is_empty() { "chatcmpl-stream" } else { ctx.completion_id.as_str() };
    queue.push_back(openai_chunk_bytes(id, model, delta, None));
}

fn handle_anthropic_event(data: &str, model: &str, ctx: &mut A2OState, queue: &mut VecDeque<Bytes>) {
    let Ok(value) = serde_json::from_str::<Value>(data) else { return };
    let Some(event_type) = value.get("type").and_then(Value::as_str) else { return };

    match event_type {
        "message_start" => {
            if let Some(message) = value.get("message") {
                if let Some(id) = message.get("id").and_then(Value::as_str) {
                    ctx.completion_id = id.to_string();
                }
                if let Some(input_tokens) = message.get("usage").and_then(|u| u.get("input_tokens")).and_then(Value::as_u64) {
                    ctx.input_tokens = Some(input_tokens as usize);
                }
            }
        }
        "content_block_start" => {
            let Some(block) = value.get("content_block") else { return };
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    let text = block.get("text").and_then(Value::as_str).unwrap_or("");
                    if !text.is_empty() {
                        push_delta(ctx, model, queue, json!({"content": text}));
                    }
                }
                Some("tool_use") => {
                    let id = block.get("id").and_then(Value::as_str).unwrap_or("");
                    let name = block.get("name").and_then(Value::as_str).unwrap_or("");
                    push_delta(
                        ctx,
                        model,
                        queue,
                        json!({"tool_calls": [{"index": 0, "id": id, "type": "function", "function": {"name": name, "arguments": ""}}]}),
                    );
                }
                _ => {}
            }
        }
        "content_block_delta" => {
            let Some(delta) = value.get("delta") else { return };
            match delta.get("type").and_then(Value::as_str) {
                Some("text_delta") => {
                    let text = delta.get("text").and_then(Value::as_str).unwrap_or("");
                    push_delta(ctx, model, queue, json!({"content": text}));
                }
                Some("input_json_delta") => {
                    let partial = delta.get("partial_json").and_then(Value::as_str).unwrap_or("");
                    push_delta(
                        ctx,
                        model,
                        queue,
                        json!({"tool_calls": [{"index": 0, "function": {"arguments": partial}}]}),
                    );
                }
                _ => {}
            }
        }
        "message_delta" => {
            let output_tokens = value.get("usage").and_then(|u| u.get("output_tokens")).and_then(Value::as_u64);
            if let Some(stop_reason) = value.get("delta").and_then(|d| d.get("stop_reason")).and_then(Value::as_str) {
                let finish_reason = stop_reason_to_finish_reason(stop_reason);
                let id = if ctx.completion_id.is_empty() { "chatcmpl-stream" } else { ctx.completion_id.as_str() };
                queue.push_back(openai_chunk_bytes(id, model, json!({}), Some(finish_reason)));
                if let Some(completion_tokens) = output_tokens {
                    queue.push_back(openai_usage_chunk_bytes(id, model, completion_tokens, ctx.input_tokens));
                }
                queue.push_back(openai_done_bytes());
                ctx.done_sent = true;
            }
        }
        // message_stop is absorbed: the [DONE] line already closed the stream.
        "message_stop" | "content_block_stop" | "ping" => {}
        _ => {}
    }
}

fn anthropic_provider_to_openai_client(model: String, input: ByteStream) -> ByteStream {
    struct State {
        input: ByteStream,
        buf: String,
        queue: VecDeque<Bytes>,
        ctx: A2OState,
        model: String,
        input_done: bool,
        finalized: bool,
    }

    let state = State { input, buf: String::new(), queue: VecDeque::new(), ctx: A2OState::default(), model, input_done: false, finalized: false };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(bytes) = state.queue.pop_front() {
                return Some((bytes, state));
            }
            if state.input_done {
                if state.finalized {
                    return None;
                }
                state.finalized = true;
                if !state.ctx.done_sent {
                    state.queue.push_back(openai_done_bytes());
                }
                continue;
            }
            match state.input.next().await {
                Some(bytes) => {
                    state.buf.push_str(&String::from_utf8_lossy(&bytes));
                    let blocks = drain_complete_blocks(&mut state.buf);
                    for block in blocks {
                        handle_anthropic_event(&block, &state.model, &mut state.ctx, &mut state.queue);
                    }
                }
                None => state.input_done = true,
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunked(events: Vec<&'static str>) -> ByteStream {
        Box::pin(stream::iter(events.into_iter().map(Bytes::from_static)))
    }

    async fn collect_text(s: ByteStream) -> String {
        let parts: Vec<Bytes> = s.collect().await;
        parts.iter().map(|b| String::from_utf8_lossy(b).to_string()).collect()
    }

    #[tokio::test]
    async fn openai_to_anthropic_wraps_with_message_start_and_stop() {
        let input = chunked(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        ]);
        let out = openai_provider_to_anthropic_client("claude-3".into(), input);
        let text = collect_text(out).await;
        assert!(text.contains("message_start"));
        assert!(text.contains("content_block_start"));
        assert!(text.contains("\"text\":\"hi\""));
        assert!(text.contains("content_block_stop"));
        assert!(text.contains("message_delta"));
        assert!(text.contains("\"stop_reason\":\"end_turn\""));
        assert!(text.ends_with("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n"));
    }

    #[tokio::test]
    async fn anthropic_to_openai_folds_role_and_emits_done() {
        let input = chunked(vec![
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\n\n",
            "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"}}\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        ]);
        let out = anthropic_provider_to_openai_client("gpt-4".into(), input);
        let text = collect_text(out).await;
        assert!(text.contains("\"role\":\"assistant\""));
        assert!(text.contains("\"content\":\"hi\""));
        assert!(text.contains("\"finish_reason\":\"stop\""));
        assert!(text.ends_with("data: [DONE]\n\n"));
        assert_eq!(text.matches("[DONE]").count(), 1);
    }

    #[tokio::test]
    async fn openai_to_anthropic_propagates_usage_from_trailing_chunk() {
        let input = chunked(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"completion_tokens\":7,\"prompt_tokens\":3,\"total_tokens\":10}}\n\n",
            "data: [DONE]\n\n",
        ]);
        let out = openai_provider_to_anthropic_client("claude-3".into(), input);
        let text = collect_text(out).await;
        assert!(text.contains("\"usage\":{\"output_tokens\":7}"));
    }

    #[tokio::test]
    async fn anthropic_to_openai_propagates_usage_from_message_delta() {
        let input = chunked(vec![
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"usage\":{\"input_tokens\":5}}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\n\n",
            "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":9}}\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        ]);
        let out = anthropic_provider_to_openai_client("gpt-4".into(), input);
        let text = collect_text(out).await;
        assert!(text.contains("\"completion_tokens\":9"));
        assert!(text.contains("\"prompt_tokens\":5"));
        assert!(text.contains("\"total_tokens\":14"));
        assert!(text.ends_with("data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn anthropic_to_openai_synthesizes_done_without_terminator() {
        let input = chunked(vec!["event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\n\n"]);
        let out = anthropic_provider_to_openai_client("gpt-4".into(), input);
        let text = collect_text(out).await;
        assert!(text.ends_with("data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn malformed_sse_payload_is_skipped() {
        let input = chunked(vec!["data: not json\n\n", "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"},\"finish_reason\":null}]}\n\n", "data: [DONE]\n\n"]);
        let out = openai_provider_to_anthropic_client("claude-3".into(), input);
        let text = collect_text(out).await;
        assert!(text.contains("\"text\":\"ok\""));
    }

    #[tokio::test]
    async fn same_protocol_is_passthrough() {
        let input = chunked(vec!["data: raw\n\n"]);
        let out = translate_stream(Protocol::OpenAi, Protocol::OpenAi, "gpt-4".into(), input);
        let text = collect_text(out).await;
        assert_eq!(text, "data: raw\n\n");
    }
}
