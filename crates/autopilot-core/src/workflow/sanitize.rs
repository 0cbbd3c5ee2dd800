//! Redaction of error text before it is stored or shown.

/// Longest sanitized message, in characters.
pub const MAX_ERROR_CHARS: usize = 240;

const REDACTED: &str = "[REDACTED]";

const SECRET_KEYS: [&str; 6] = [
    "api_key=",
    "key=",
    "token=",
    "secret=",
    "password=",
    "private_key",
];

/// Strip credential-looking fragments and truncate.
///
/// Redacts `key=value` style secrets, `Bearer` tokens and anything that
/// looks like service-account JSON. Whitespace is collapsed.
pub fn sanitize_error(message: &str) -> String {
    if message.contains("\"type\": \"service_account\"")
        || message.contains("\"type\":\"service_account\"")
        || message.contains("-----BEGIN")
    {
        return format!("{REDACTED} (credential material removed)");
    }

    let mut words: Vec<String> = Vec::new();
    let mut redact_next = false;
    for word in message.split_whitespace() {
        if redact_next {
            words.push(REDACTED.to_string());
            redact_next = false;
            continue;
        }
        if word.eq_ignore_ascii_case("bearer") {
            words.push(word.to_string());
            redact_next = true;
            continue;
        }
        words.push(redact_word(word));
    }

    let joined = words.join(" ");
    if joined.chars().count() <= MAX_ERROR_CHARS {
        joined
    } else {
        let mut truncated: String = joined.chars().take(MAX_ERROR_CHARS - 3).collect();
        truncated.push_str("...");
        truncated
    }
}

fn redact_word(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    for key in SECRET_KEYS {
        if let Some(pos) = lower.find(key) {
            if key.ends_with('=') {
                let cut = pos + key.len();
                return format!("{}{REDACTED}", &word[..cut]);
            }
            return REDACTED.to_string();
        }
    }
    word.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacts_key_value_secrets() {
        let out = sanitize_error("request failed: api_key=sk-live-123 token=abc");
        assert_eq!(out, "request failed: api_key=[REDACTED] token=[REDACTED]");
    }

    #[test]
    fn test_redacts_bearer_tokens() {
        let out = sanitize_error("401 from upstream Authorization: Bearer eyJhbGciOi.x.y");
        assert!(out.ends_with("Bearer [REDACTED]"));
        assert!(!out.contains("eyJ"));
    }

    #[test]
    fn test_drops_service_account_json() {
        let out = sanitize_error(r#"bad creds {"type": "service_account", "private_key": "..."}"#);
        assert!(out.starts_with(REDACTED));
        assert!(!out.contains("private_key"));
    }

    #[test]
    fn test_truncates_long_messages() {
        let out = sanitize_error(&"x".repeat(1000));
        assert_eq!(out.chars().count(), MAX_ERROR_CHARS);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_plain_messages_pass_through() {
        assert_eq!(sanitize_error("quota   exhausted\nfor today"), "quota exhausted for today");
    }
}
