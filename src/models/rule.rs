use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token counts attached to a request context. `total` is derived, never
/// stored independently, so it can never drift from `input + output`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    NotContains,
    Regex,
    In,
    NotIn,
    Exists,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Logic {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub logic: Logic,
}

/// The addressable snapshot of a request used by rule evaluation.
///
/// `body` is kept as a raw `serde_json::Value` rather than a hand-rolled
/// tagged union: it already is the tagged union this needs, and reusing it
/// avoids a parallel value representation with its own bugs.
#[derive(Debug, Clone)]
pub struct RuleContext {
    pub current_model: String,
    /// Header names are case-insensitive; store lowercased.
    pub headers: HashMap<String, String>,
    pub body: Value,
    pub token_usage: TokenUsage,
}

impl RuleContext {
    pub fn new(current_model: impl Into<String>, headers: HashMap<String, String>, body: Value) -> Self {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self {
            current_model: current_model.into(),
            headers,
            body,
            token_usage: TokenUsage::default(),
        }
    }

    /// Resolve a dotted field path. Returns `None` when the path is absent,
    /// which is distinct from a present `Value::Null`.
    pub fn get_value(&self, field_path: &str) -> Option<Value> {
        let mut parts = field_path.split('.');
        let root = parts.next()?.to_ascii_lowercase();
        let rest: Vec<&str> = parts.collect();

        match root.as_str() {
            "model" => Some(Value::String(self.current_model.clone())),
            "headers" => {
                if rest.is_empty() {
                    return None;
                }
                let name = rest.join(".").to_ascii_lowercase();
                self.headers.get(&name).map(|v| Value::String(v.clone()))
            }
            "body" => {
                if rest.is_empty() {
                    return None;
                }
                get_nested(&self.body, &rest)
            }
            "token_usage" => match rest.first().copied() {
                Some("input_tokens") => Some(Value::from(self.token_usage.input_tokens)),
                Some("output_tokens") => Some(Value::from(self.token_usage.output_tokens)),
                Some("total_tokens") => Some(Value::from(self.token_usage.total_tokens())),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Walk `value` through `segments`, each of which is a key optionally
/// followed by one or more `[index]` suffixes (e.g. `messages[0]`, `[2]`).
fn get_nested(value: &Value, segments: &[&str]) -> Option<Value> {
    let mut current = value.clone();
    for segment in segments {
        let (key, indices) = split_segment(segment);
        if let Some(key) = key {
            current = current.get(key)?.clone();
        }
        for idx in indices {
            current = current.get(idx)?.clone();
        }
    }
    Some(current)
}

/// Split `messages[0][1]` into (`Some("messages")`, `[0, 1]`), or
/// `[2]` into (`None`, `[2]`).
fn split_segment(segment: &str) -> (Option<&str>, Vec<usize>) {
    let bracket = segment.find('[');
    let (key_part, mut rest) = match bracket {
        Some(pos) => (&segment[..pos], &segment[pos..]),
        None => return (Some(segment).filter(|s| !s.is_empty()), Vec::new()),
    };
    let mut indices = Vec::new();
    while let Some(open) = rest.find('[') {
        let Some(close) = rest[open..].find(']') else {
            break;
        };
        let close = open + close;
        if let Ok(idx) = rest[open + 1..close].parse::<usize>() {
            indices.push(idx);
        }
        rest = &rest[close + 1..];
    }
    (Some(key_part).filter(|s| !s.is_empty()), indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(body: Value) -> RuleContext {
        RuleContext::new("gpt-4", HashMap::new(), body)
    }

    #[test]
    fn resolves_model() {
        let c = ctx(serde_json::json!({}));
        assert_eq!(c.get_value("model"), Some(Value::String("gpt-4".into())));
    }

    #[test]
    fn resolves_header_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("X-Priority".into(), "gold".into());
        let c = RuleContext::new("m", headers, serde_json::json!({}));
        assert_eq!(c.get_value("headers.x-priority"), Some(Value::String("gold".into())));
    }

    #[test]
    fn resolves_array_index_path() {
        let c = ctx(serde_json::json!({"messages": [{"role": "user"}, {"role": "assistant"}]}));
        assert_eq!(
            c.get_value("body.messages[1].role"),
            Some(Value::String("assistant".into()))
        );
    }

    #[test]
    fn missing_path_is_absent() {
        let c = ctx(serde_json::json!({"a": 1}));
        assert_eq!(c.get_value("body.b"), None);
    }

    #[test]
    fn null_is_present_but_absent_is_not() {
        let c = ctx(serde_json::json!({"a": null}));
        assert_eq!(c.get_value("body.a"), Some(Value::Null));
        assert_eq!(c.get_value("body.missing"), None);
    }

    #[test]
    fn token_usage_total_is_derived() {
        let mut c = ctx(serde_json::json!({}));
        c.token_usage = TokenUsage { input_tokens: 5, output_tokens: 2 };
        assert_eq!(c.get_value("token_usage.total_tokens"), Some(Value::from(7)));
    }
}
