//! Request input checks, applied before anything reaches a worker.

use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::chat::ChatError;

/// Default ceiling on message length, in characters.
pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 4000;

static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Markup that has no business in a chat message.
static SCRIPT_INJECTION: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)<script[^>]*>",
        r"(?i)javascript\s*:",
        r"(?i)\bon[a-z]+\s*=\s*['\x22]",
        r"(?i)<iframe[^>]*>",
        r"(?i)<object[^>]*>",
        r"(?i)<embed[^>]*>",
        r"(?i)<meta[^>]*http-equiv[^>]*refresh",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("injection pattern is valid"))
    .collect()
});

/// Trim, collapse whitespace runs (newlines included) to one space and drop
/// control characters. The worker reads one line per message.
pub fn clean_message(message: &str) -> String {
    let collapsed = WHITESPACE.replace_all(message.trim(), " ");
    collapsed.chars().filter(|c| !c.is_control()).collect()
}

/// Validate and clean a chat message.
pub fn validate_message(message: &str, max_chars: usize) -> Result<String, ChatError> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return Err(ChatError::validation("message", "message must not be empty"));
    }
    let length = trimmed.chars().count();
    if length > max_chars {
        return Err(ChatError::validation(
            "message",
            format!("message is {length} characters, the maximum is {max_chars}"),
        ));
    }
    if SCRIPT_INJECTION.iter().any(|re| re.is_match(trimmed)) {
        return Err(ChatError::validation(
            "message",
            "message contains markup that is not allowed",
        ));
    }

    let cleaned = clean_message(trimmed);
    if cleaned.is_empty() {
        return Err(ChatError::validation("message", "message must not be empty"));
    }
    Ok(cleaned)
}

/// Session ids are UUIDs; returns the canonical hyphenated lowercase form.
pub fn validate_session_id(session_id: &str) -> Result<String, ChatError> {
    Uuid::parse_str(session_id.trim())
        .map(|id| id.to_string())
        .map_err(|_| ChatError::validation("session_id", "session id must be a UUID"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_message_collapses_whitespace() {
        assert_eq!(clean_message("  hello \n\t world  "), "hello world");
        assert_eq!(clean_message("a\u{7}b"), "ab");
    }

    #[test]
    fn test_validate_message_limits() {
        assert!(validate_message("   ", 4000).is_err());
        assert!(validate_message(&"x".repeat(4000), 4000).is_ok());

        let err = validate_message(&"x".repeat(4001), 4000).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("4001"));
    }

    #[test]
    fn test_validate_message_counts_characters_not_bytes() {
        assert!(validate_message(&"名".repeat(4000), 4000).is_ok());
    }

    #[test]
    fn test_validate_message_rejects_injection() {
        for bad in [
            "<script>alert(1)</script>",
            "click javascript:alert(1)",
            "<img src=x onerror='boom'>",
            "<IFRAME src=evil>",
        ] {
            assert!(validate_message(bad, 4000).is_err(), "accepted {bad:?}");
        }
        assert!(validate_message("How do I use an iframe in React?", 4000).is_ok());
    }

    #[test]
    fn test_validate_session_id() {
        let id = Uuid::new_v4().to_string();
        assert_eq!(validate_session_id(&id).unwrap(), id);
        assert_eq!(
            validate_session_id(&id.to_uppercase()).unwrap(),
            id,
            "normalised to lowercase"
        );
        assert!(validate_session_id("not-a-session").is_err());
        assert!(validate_session_id("").is_err());
    }
}
