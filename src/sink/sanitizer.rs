//! Credential sanitizer for the Log Sink (C9). Applied to outbound log
//! records only — never touches headers used for the actual upstream call.

use std::collections::HashMap;

const SANITIZED_HEADER_NAMES: &[&str] = &["authorization", "x-api-key", "api-key"];

/// Mask a credential value, preserving a leading `Bearer ` prefix if
/// present. Tokens of 8 characters or fewer are masked in full; longer
/// tokens keep their first 4 and last 2 characters.
pub fn sanitize_authorization(value: &str) -> String {
    let (prefix, token) = match value.get(..7) {
        Some(candidate) if candidate.eq_ignore_ascii_case("bearer ") => (candidate, &value[7..]),
        _ => ("", value),
    };

    if token.chars().count() <= 8 {
        format!("{prefix}***")
    } else {
        let chars: Vec<char> = token.chars().collect();
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 2..].iter().collect();
        format!("{prefix}{head}***...***{tail}")
    }
}

/// Copy `headers`, masking the values of `authorization`, `x-api-key`,
/// and `api-key` (case-insensitive key match). The original map is never
/// mutated.
pub fn sanitize_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| {
            if SANITIZED_HEADER_NAMES.contains(&k.to_ascii_lowercase().as_str()) {
                (k.clone(), sanitize_authorization(v))
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_bearer_token_keeping_prefix() {
        let masked = sanitize_authorization("Bearer abcdefghijkl");
        assert_eq!(masked, "Bearer abcd***...***kl");
    }

    #[test]
    fn short_token_after_prefix_is_fully_masked() {
        let masked = sanitize_authorization("Bearer short1");
        assert_eq!(masked, "Bearer ***");
    }

    #[test]
    fn bearer_prefix_match_is_case_insensitive() {
        let masked = sanitize_authorization("bearer abcdefghijkl");
        assert_eq!(masked, "bearer abcd***...***kl");
    }

    #[test]
    fn no_bearer_prefix_masks_whole_value() {
        let masked = sanitize_authorization("sk-abcdefghijkl");
        assert_eq!(masked, "sk-a***...***kl");
    }

    #[test]
    fn sanitize_headers_copies_without_mutating_original() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer abcdefghijkl".to_string());
        headers.insert("X-Api-Key".to_string(), "sk-abcdefghijkl".to_string());
        headers.insert("x-custom".to_string(), "untouched".to_string());

        let sanitized = sanitize_headers(&headers);

        assert_eq!(sanitized.get("Authorization").unwrap(), "Bearer abcd***...***kl");
        assert_eq!(sanitized.get("X-Api-Key").unwrap(), "sk-a***...***kl");
        assert_eq!(sanitized.get("x-custom").unwrap(), "untouched");
        assert_eq!(headers.get("Authorization").unwrap(), "Bearer abcdefghijkl");
    }
}
