//! Protocol Translator (C4): buffered request/response conversion between
//! the OpenAI and Anthropic wire shapes.
//!
//! Streaming SSE translation lives in [`super::stream_translate`]; this
//! module only handles the four (client, provider) combinations for a
//! complete JSON body.

use serde_json::{json, Map, Value};

use crate::errors::AppError;
use crate::models::Protocol;

/// The inbound HTTP route a client used to reach the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    ChatCompletions,
    Completions,
    Embeddings,
    Messages,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::ChatCompletions => "/v1/chat/completions",
            Endpoint::Completions => "/v1/completions",
            Endpoint::Embeddings => "/v1/embeddings",
            Endpoint::Messages => "/v1/messages",
        }
    }
}

/// Translate a client request body into the shape and path the chosen
/// provider expects. Returns `(path, body)`.
pub fn translate_request(
    client_protocol: Protocol,
    provider_protocol: Protocol,
    endpoint: Endpoint,
    body: &Value,
    target_model: &str,
) -> Result<(String, Value), AppError> {
    if client_protocol == provider_protocol {
        let mut out = body.clone();
        if let Some(obj) = out.as_object_mut() {
            obj.insert("model".into(), json!(target_model));
        }
        return Ok((endpoint.path().to_string(), out));
    }

    match (client_protocol, provider_protocol) {
        (Protocol::OpenAi, Protocol::Anthropic) => {
            if endpoint != Endpoint::ChatCompletions {
                return Err(unsupported(client_protocol, provider_protocol, endpoint));
            }
            let mut out = openai_to_anthropic_request(body);
            out["model"] = json!(target_model);
            Ok((Endpoint::Messages.path().to_string(), out))
        }
        (Protocol::Anthropic, Protocol::OpenAi) => {
            if endpoint != Endpoint::Messages {
                return Err(unsupported(client_protocol, provider_protocol, endpoint));
            }
            let mut out = anthropic_to_openai_request(body);
            out["model"] = json!(target_model);
            Ok((Endpoint::ChatCompletions.path().to_string(), out))
        }
        _ => Err(unsupported(client_protocol, provider_protocol, endpoint)),
    }
}

/// Translate a buffered provider response back into the client's protocol.
/// `client_protocol == provider_protocol` is passthrough and never reaches
/// this function — callers handle that case without a conversion.
pub fn translate_response(
    client_protocol: Protocol,
    provider_protocol: Protocol,
    body: &Value,
    requested_model: &str,
) -> Result<Value, AppError> {
    match (client_protocol, provider_protocol) {
        (Protocol::OpenAi, Protocol::Anthropic) => Ok(anthropic_to_openai_response(body, requested_model)),
        (Protocol::Anthropic, Protocol::OpenAi) => Ok(openai_to_anthropic_response(body, requested_model)),
        (a, b) if a == b => Ok(body.clone()),
        (a, b) => Err(AppError::UnsupportedProtocolConversion(format!("{a:?} -> {b:?} response"))),
    }
}

/// Whether C4 can translate this (client, provider, endpoint) combination
/// at all. Used by the orchestrator to filter candidates before handing
/// them to the retry engine, so an unsupported pairing never consumes a
/// retry attempt.
pub fn is_supported(client_protocol: Protocol, provider_protocol: Protocol, endpoint: Endpoint) -> bool {
    if client_protocol == provider_protocol {
        return true;
    }
    match (client_protocol, provider_protocol) {
        (Protocol::OpenAi, Protocol::Anthropic) => endpoint == Endpoint::ChatCompletions,
        (Protocol::Anthropic, Protocol::OpenAi) => endpoint == Endpoint::Messages,
        _ => false,
    }
}

fn unsupported(client: Protocol, provider: Protocol, endpoint: Endpoint) -> AppError {
    AppError::UnsupportedProtocolConversion(format!(
        "{client:?} client -> {provider:?} provider on {}",
        endpoint.path()
    ))
}

/// end_turn <-> stop, max_tokens <-> length, tool_use <-> tool_calls.
fn stop_reason_to_finish_reason(stop_reason: &str) -> &'static str {
    match stop_reason {
        "end_turn" => "stop",
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        _ => "stop",
    }
}

fn finish_reason_to_stop_reason(finish_reason: &str) -> &'static str {
    match finish_reason {
        "stop" => "end_turn",
        "length" => "max_tokens",
        "tool_calls" => "tool_use",
        _ => "end_turn",
    }
}

// ── OpenAI -> Anthropic ──────────────────────────────────────────

fn openai_to_anthropic_request(body: &Value) -> Value {
    let mut result = Map::new();

    if let Some(model) = body.get("model") {
        result.insert("model".into(), model.clone());
    }

    let max_tokens = body
        .get("max_tokens")
        .and_then(Value::as_u64)
        .or_else(|| body.get("max_completion_tokens").and_then(Value::as_u64))
        .unwrap_or(1024);
    result.insert("max_tokens".into(), json!(max_tokens));

    if let Some(messages) = body.get("messages").and_then(Value::as_array) {
        let mut system_parts = Vec::new();
        let mut out_messages = Vec::new();

        for msg in messages {
            let role = msg.get("role").and_then(Value::as_str).unwrap_or("");
            match role {
                "system" => {
                    if let Some(content) = msg.get("content").and_then(Value::as_str) {
                        system_parts.push(content.to_string());
                    }
                }
                "user" | "assistant" => {
                    let mut new_msg = Map::new();
                    new_msg.insert("role".into(), json!(role));
                    if let Some(content) = msg.get("content") {
                        if content.is_string() {
                            new_msg.insert("content".into(), content.clone());
                        } else if let Some(parts) = content.as_array() {
                            let anthropic_parts: Vec<Value> = parts
                                .iter()
                                .map(|p| {
                                    let part_type = p.get("type").and_then(Value::as_str).unwrap_or("text");
                                    match part_type {
                                        "text" => json!({"type": "text", "text": p.get("text").cloned().unwrap_or(json!(""))}),
                                        "image_url" => {
                                            let url = p
                                                .get("image_url")
                                                .and_then(|u| u.get("url"))
                                                .and_then(Value::as_str)
                                                .unwrap_or("");
                                            json!({"type": "image", "source": {"type": "url", "url": url}})
                                        }
                                        _ => p.clone(),
                                    }
                                })
                                .collect();
                            new_msg.insert("content".into(), json!(anthropic_parts));
                        }
                    }
                    out_messages.push(Value::Object(new_msg));
                }
                "tool" => {
                    out_messages.push(json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": msg.get("tool_call_id").cloned().unwrap_or(json!("")),
                            "content": msg.get("content").cloned().unwrap_or(json!("")),
                        }]
                    }));
                }
                _ => out_messages.push(msg.clone()),
            }
        }

        if !system_parts.is_empty() {
            result.insert("system".into(), json!(system_parts.join("\n")));
        }
        result.insert("messages".into(), json!(out_messages));
    }

    if let Some(v) = body.get("temperature") {
        result.insert("temperature".into(), v.clone());
    }
    if let Some(v) = body.get("top_p") {
        result.insert("top_p".into(), v.clone());
    }
    if let Some(stop) = body.get("stop") {
        if let Some(arr) = stop.as_array() {
            result.insert("stop_sequences".into(), json!(arr));
        } else if let Some(s) = stop.as_str() {
            result.insert("stop_sequences".into(), json!([s]));
        }
    }
    if let Some(tools) = body.get("tools").and_then(Value::as_array) {
        let anthropic_tools: Vec<Value> = tools
            .iter()
            .filter_map(|tool| {
                let func = tool.get("function")?;
                Some(json!({
                    "name": func.get("name").cloned().unwrap_or(json!("")),
                    "description": func.get("description").cloned().unwrap_or(json!("")),
                    "input_schema": func.get("parameters").cloned().unwrap_or(json!({"type": "object"})),
                }))
            })
            .collect();
        if !anthropic_tools.is_empty() {
            result.insert("tools".into(), json!(anthropic_tools));
        }
    }
    if let Some(tc) = body.get("tool_choice") {
        match tc.as_str() {
            Some("auto") => {
                result.insert("tool_choice".into(), json!({"type": "auto"}));
            }
            Some("required") => {
                result.insert("tool_choice".into(), json!({"type": "any"}));
            }
            Some("none") => {}
            None if tc.is_object() => {
                if let Some(name) = tc.get("function").and_then(|f| f.get("name")) {
                    result.insert("tool_choice".into(), json!({"type": "tool", "name": name}));
                }
            }
            _ => {}
        }
    }
    if let Some(v) = body.get("stream") {
        result.insert("stream".into(), v.clone());
    }

    Value::Object(result)
}

fn anthropic_to_openai_response(body: &Value, model: &str) -> Value {
    let content_blocks = body.get("content").and_then(Value::as_array);

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    if let Some(blocks) = content_blocks {
        for block in blocks {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(t) = block.get("text").and_then(Value::as_str) {
                        text.push_str(t);
                    }
                }
                Some("tool_use") => {
                    tool_calls.push(json!({
                        "id": block.get("id").cloned().unwrap_or(json!("")),
                        "type": "function",
                        "function": {
                            "name": block.get("name").cloned().unwrap_or(json!("")),
                            "arguments": block.get("input").map(|v| v.to_string()).unwrap_or_else(|| "{}".into()),
                        }
                    }));
                }
                _ => {}
            }
        }
    }

    let mut message = json!({"role": "assistant", "content": text});
    if !tool_calls.is_empty() {
        message["tool_calls"] = json!(tool_calls);
        message["content"] = Value::Null;
    }

    let finish_reason = body
        .get("stop_reason")
        .and_then(Value::as_str)
        .map(stop_reason_to_finish_reason)
        .unwrap_or("stop");

    let usage = body.get("usage");
    let input_tokens = usage.and_then(|u| u.get("input_tokens")).and_then(Value::as_u64).unwrap_or(0);
    let output_tokens = usage.and_then(|u| u.get("output_tokens")).and_then(Value::as_u64).unwrap_or(0);

    json!({
        "id": body.get("id").cloned().unwrap_or(json!("")),
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason,
        }],
        "usage": {
            "prompt_tokens": input_tokens,
            "completion_tokens": output_tokens,
            "total_tokens": input_tokens + output_tokens,
        }
    })
}

// ── Anthropic -> OpenAI ──────────────────────────────────────────

fn anthropic_to_openai_request(body: &Value) -> Value {
    let mut result = Map::new();

    if let Some(model) = body.get("model") {
        result.insert("model".into(), model.clone());
    }
    if let Some(max_tokens) = body.get("max_tokens") {
        result.insert("max_tokens".into(), max_tokens.clone());
    }

    let mut messages = Vec::new();
    if let Some(system) = body.get("system").and_then(Value::as_str) {
        messages.push(json!({"role": "system", "content": system}));
    }
    if let Some(in_messages) = body.get("messages").and_then(Value::as_array) {
        for msg in in_messages {
            let role = msg.get("role").and_then(Value::as_str).unwrap_or("user");
            let content = msg.get("content");
            match content {
                Some(Value::String(s)) => messages.push(json!({"role": role, "content": s})),
                Some(Value::Array(parts)) => {
                    let mut text_parts = Vec::new();
                    let mut tool_calls = Vec::new();
                    let mut tool_results = Vec::new();
                    for p in parts {
                        match p.get("type").and_then(Value::as_str) {
                            Some("text") => {
                                if let Some(t) = p.get("text").and_then(Value::as_str) {
                                    text_parts.push(t.to_string());
                                }
                            }
                            Some("tool_use") => tool_calls.push(json!({
                                "id": p.get("id").cloned().unwrap_or(json!("")),
                                "type": "function",
                                "function": {
                                    "name": p.get("name").cloned().unwrap_or(json!("")),
                                    "arguments": p.get("input").map(|v| v.to_string()).unwrap_or_else(|| "{}".into()),
                                }
                            })),
                            Some("tool_result") => tool_results.push(json!({
                                "role": "tool",
                                "tool_call_id": p.get("tool_use_id").cloned().unwrap_or(json!("")),
                                "content": p.get("content").cloned().unwrap_or(json!("")),
                            })),
                            _ => {}
                        }
                    }
                    if !tool_results.is_empty() {
                        messages.extend(tool_results);
                    } else {
                        let mut m = json!({"role": role, "content": text_parts.join("\n")});
                        if !tool_calls.is_empty() {
                            m["tool_calls"] = json!(tool_calls);
                        }
                        messages.push(m);
                    }
                }
                _ => messages.push(json!({"role": role, "content": ""})),
            }
        }
    }
    result.insert("messages".into(), json!(messages));

    if let Some(v) = body.get("temperature") {
        result.insert("temperature".into(), v.clone());
    }
    if let Some(v) = body.get("top_p") {
        result.insert("top_p".into(), v.clone());
    }
    if let Some(seqs) = body.get("stop_sequences") {
        result.insert("stop".into(), seqs.clone());
    }
    if let Some(tools) = body.get("tools").and_then(Value::as_array) {
        let openai_tools: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.get("name").cloned().unwrap_or(json!("")),
                        "description": t.get("description").cloned().unwrap_or(json!("")),
                        "parameters": t.get("input_schema").cloned().unwrap_or(json!({"type": "object"})),
                    }
                })
            })
            .collect();
        result.insert("tools".into(), json!(openai_tools));
    }
    if let Some(tc) = body.get("tool_choice") {
        match tc.get("type").and_then(Value::as_str) {
            Some("auto") => {
                result.insert("tool_choice".into(), json!("auto"));
            }
            Some("any") => {
                result.insert("tool_choice".into(), json!("required"));
            }
            Some("tool") => {
                if let Some(name) = tc.get("name") {
                    result.insert("tool_choice".into(), json!({"type": "function", "function": {"name": name}}));
                }
            }
            _ => {}
        }
    }
    if let Some(v) = body.get("stream") {
        result.insert("stream".into(), v.clone());
    }

    Value::Object(result)
}

fn openai_to_anthropic_response(body: &Value, model: &str) -> Value {
    let choice = body.get("choices").and_then(Value::as_array).and_then(|c| c.first());
    let message = choice.and_then(|c| c.get("message"));

    let mut content_blocks = Vec::new();
    if let Some(text) = message.and_then(|m| m.get("content")).and_then(Value::as_str) {
        if !text.is_empty() {
            content_blocks.push(json!({"type": "text", "text": text}));
        }
    }
    if let Some(tool_calls) = message.and_then(|m| m.get("tool_calls")).and_then(Value::as_array) {
        for tc in tool_calls {
            let func = tc.get("function");
            let input: Value = func
                .and_then(|f| f.get("arguments"))
                .and_then(Value::as_str)
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or_else(|| json!({}));
            content_blocks.push(json!({
                "type": "tool_use",
                "id": tc.get("id").cloned().unwrap_or(json!("")),
                "name": func.and_then(|f| f.get("name")).cloned().unwrap_or(json!("")),
                "input": input,
            }));
        }
    }

    let finish_reason = choice.and_then(|c| c.get("finish_reason")).and_then(Value::as_str).unwrap_or("stop");
    let stop_reason = finish_reason_to_stop_reason(finish_reason);

    let usage = body.get("usage");
    let input_tokens = usage.and_then(|u| u.get("prompt_tokens")).and_then(Value::as_u64).unwrap_or(0);
    let output_tokens = usage.and_then(|u| u.get("completion_tokens")).and_then(Value::as_u64).unwrap_or(0);

    json!({
        "id": body.get("id").cloned().unwrap_or(json!("")),
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content_blocks,
        "stop_reason": stop_reason,
        "usage": {
            "input_tokens": input_tokens,
            "output_tokens": output_tokens,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_protocol_overwrites_model_only() {
        let body = json!({"model": "gpt-4", "messages": [{"role": "user", "content": "hi"}]});
        let (path, out) = translate_request(Protocol::OpenAi, Protocol::OpenAi, Endpoint::ChatCompletions, &body, "gpt-4-0613").unwrap();
        assert_eq!(path, "/v1/chat/completions");
        assert_eq!(out["model"], json!("gpt-4-0613"));
        assert_eq!(out["messages"], body["messages"]);
    }

    #[test]
    fn openai_to_anthropic_synthesizes_default_max_tokens() {
        let body = json!({"model": "claude", "messages": [{"role": "user", "content": "hello"}]});
        let (path, out) = translate_request(Protocol::OpenAi, Protocol::Anthropic, Endpoint::ChatCompletions, &body, "claude-3").unwrap();
        assert_eq!(path, "/v1/messages");
        assert_eq!(out["max_tokens"], json!(1024));
        assert_eq!(out["model"], json!("claude-3"));
    }

    #[test]
    fn openai_to_anthropic_unsupported_endpoint() {
        let body = json!({"model": "claude"});
        let err = translate_request(Protocol::OpenAi, Protocol::Anthropic, Endpoint::Completions, &body, "claude-3");
        assert!(err.is_err());
    }

    #[test]
    fn cross_protocol_response_matches_literal_scenario() {
        let body = json!({
            "content": [{"type": "text", "text": "hi"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 5, "output_tokens": 2}
        });
        let out = translate_response(Protocol::OpenAi, Protocol::Anthropic, &body, "claude").unwrap();
        assert_eq!(out["choices"][0]["message"]["content"], json!("hi"));
        assert_eq!(out["choices"][0]["finish_reason"], json!("stop"));
        assert_eq!(out["usage"]["prompt_tokens"], json!(5));
        assert_eq!(out["usage"]["completion_tokens"], json!(2));
    }

    #[test]
    fn anthropic_request_extracts_system_message() {
        let body = json!({"messages": [
            {"role": "system", "content": "be nice"},
            {"role": "user", "content": "hi"}
        ]});
        let out = openai_to_anthropic_request(&body);
        assert_eq!(out["system"], json!("be nice"));
        assert_eq!(out["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn round_trip_openai_anthropic_openai_preserves_content() {
        let original = json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hello"}],
            "max_tokens": 50
        });
        let (_, anthropic_req) = translate_request(Protocol::OpenAi, Protocol::Anthropic, Endpoint::ChatCompletions, &original, "claude-3").unwrap();
        assert_eq!(anthropic_req["messages"][0]["content"], json!("hello"));

        let anthropic_resp = json!({
            "content": [{"type": "text", "text": "hi there"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 3, "output_tokens": 2}
        });
        let openai_resp = translate_response(Protocol::OpenAi, Protocol::Anthropic, &anthropic_resp, "gpt-4").unwrap();
        assert_eq!(openai_resp["choices"][0]["message"]["content"], json!("hi there"));
        assert_eq!(openai_resp["choices"][0]["finish_reason"], json!("stop"));
    }
}
