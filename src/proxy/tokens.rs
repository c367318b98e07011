//! Token Accountant (C7): input-token estimation from request messages and
//! output-token harvesting from provider responses.

use once_cell::sync::Lazy;
use serde_json::Value;
use tiktoken_rs::CoreBPE;

use crate::models::Protocol;

static CL100K_BASE: Lazy<Option<CoreBPE>> = Lazy::new(|| tiktoken_rs::cl100k_base().ok());
static P50K_BASE: Lazy<Option<CoreBPE>> = Lazy::new(|| tiktoken_rs::p50k_base().ok());

const CL100K_MODEL_PREFIXES: &[&str] = &["gpt-4-32k", "gpt-4-turbo", "gpt-4", "gpt-3.5-turbo", "text-embedding-ada-002"];
const P50K_MODEL_PREFIXES: &[&str] = &["text-davinci-003"];

fn encoding_for_openai_model(model: &str) -> Option<&'static CoreBPE> {
    if CL100K_MODEL_PREFIXES.iter().any(|p| model.starts_with(p)) {
        CL100K_BASE.as_ref()
    } else if P50K_MODEL_PREFIXES.iter().any(|p| model.starts_with(p)) {
        P50K_BASE.as_ref()
    } else {
        None
    }
}

fn count_text(bpe: Option<&CoreBPE>, text: &str) -> usize {
    match bpe {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.len() / 4,
    }
}

/// Counts a single message field's contribution. Multimodal `content`
/// arrays are walked for `text` blocks; other fields count their string
/// value directly.
fn field_token_count(bpe: Option<&CoreBPE>, value: &Value) -> usize {
    match value {
        Value::String(s) => count_text(bpe, s),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| b.get("text"))
            .filter_map(Value::as_str)
            .map(|t| count_text(bpe, t))
            .sum(),
        _ => 0,
    }
}

fn count_openai_input_tokens(model: &str, messages: &[Value]) -> usize {
    let bpe = encoding_for_openai_model(model);
    let mut total = 0usize;
    for msg in messages {
        let mut per_message: i64 = 4;
        if let Some(obj) = msg.as_object() {
            for (key, value) in obj {
                total += field_token_count(bpe, value);
                if key == "name" {
                    per_message -= 1;
                }
            }
        }
        total += per_message.max(0) as usize;
    }
    total + 3
}

fn count_anthropic_input_tokens(messages: &[Value]) -> usize {
    let mut total = 0usize;
    for msg in messages {
        if let Some(obj) = msg.as_object() {
            for (_key, value) in obj {
                total += field_token_count(None, value);
            }
        }
        total += 4;
    }
    total
}

/// Estimate input tokens for the request messages, using the counting
/// basis of `protocol` (the first loaded provider's protocol, per the
/// orchestrator).
pub fn count_input_tokens(protocol: Protocol, model: &str, messages: &[Value]) -> usize {
    match protocol {
        Protocol::OpenAi => count_openai_input_tokens(model, messages),
        Protocol::Anthropic => count_anthropic_input_tokens(messages),
    }
}

/// Output tokens from a buffered (non-streamed) provider response.
pub fn output_tokens_from_buffered_response(protocol: Protocol, body: &Value) -> usize {
    let usage = body.get("usage");
    match protocol {
        Protocol::OpenAi => usage.and_then(|u| u.get("completion_tokens")).and_then(Value::as_u64).unwrap_or(0) as usize,
        Protocol::Anthropic => usage.and_then(|u| u.get("output_tokens")).and_then(Value::as_u64).unwrap_or(0) as usize,
    }
}

/// Scan one parsed SSE event body for a terminal usage figure. Callers
/// keep the last `Some` seen across the stream; events without usage
/// information return `None`.
pub fn output_tokens_from_stream_event(protocol: Protocol, event: &Value) -> Option<usize> {
    match protocol {
        Protocol::OpenAi => event.get("usage").and_then(|u| u.get("completion_tokens")).and_then(Value::as_u64).map(|v| v as usize),
        Protocol::Anthropic => {
            if event.get("type").and_then(Value::as_str) != Some("message_delta") {
                return None;
            }
            event.get("usage").and_then(|u| u.get("output_tokens")).and_then(Value::as_u64).map(|v| v as usize)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cl100k_encoding_selected_for_gpt4() {
        let messages = vec![json!({"role": "user", "content": "hello world"})];
        let tokens = count_input_tokens(Protocol::OpenAi, "gpt-4-0613", &messages);
        assert!(tokens > 0);
    }

    #[test]
    fn unknown_model_falls_back_to_len_over_four() {
        let messages = vec![json!({"role": "user", "content": "abcdefgh"})];
        let tokens = count_openai_input_tokens("some-custom-model", &messages);
        // content field: "abcdefgh"/4 = 2, role field: "user"/4 = 1, per_message 4, priming 3.
        assert_eq!(tokens, 2 + 1 + 4 + 3);
    }

    #[test]
    fn name_field_subtracts_one_from_overhead() {
        let with_name = vec![json!({"role": "user", "name": "a", "content": ""})];
        let without_name = vec![json!({"role": "user", "content": ""})];
        let a = count_openai_input_tokens("custom-model", &with_name);
        let b = count_openai_input_tokens("custom-model", &without_name);
        assert_eq!(a, b - 1);
    }

    #[test]
    fn anthropic_counter_never_uses_bpe() {
        let messages = vec![json!({"role": "user", "content": "abcdefgh"})];
        let tokens = count_anthropic_input_tokens(&messages);
        assert_eq!(tokens, 2 + 1 + 4);
    }

    #[test]
    fn multimodal_content_walks_text_blocks() {
        let messages = vec![json!({
            "role": "user",
            "content": [
                {"type": "text", "text": "abcd"},
                {"type": "image_url", "image_url": {"url": "https://x"}},
                {"type": "text", "text": "efgh"},
            ]
        })];
        let tokens = count_anthropic_input_tokens(&messages);
        assert_eq!(tokens, 1 + 1 + 1 + 4);
    }

    #[test]
    fn output_tokens_from_buffered_openai_response() {
        let body = json!({"usage": {"completion_tokens": 42}});
        assert_eq!(output_tokens_from_buffered_response(Protocol::OpenAi, &body), 42);
    }

    #[test]
    fn output_tokens_from_buffered_anthropic_response() {
        let body = json!({"usage": {"output_tokens": 17}});
        assert_eq!(output_tokens_from_buffered_response(Protocol::Anthropic, &body), 17);
    }

    #[test]
    fn output_tokens_from_anthropic_stream_only_on_message_delta() {
        let content_block_delta = json!({"type": "content_block_delta"});
        let message_delta = json!({"type": "message_delta", "usage": {"output_tokens": 9}});
        assert_eq!(output_tokens_from_stream_event(Protocol::Anthropic, &content_block_delta), None);
        assert_eq!(output_tokens_from_stream_event(Protocol::Anthropic, &message_delta), Some(9));
    }
}
