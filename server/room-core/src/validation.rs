//! Shared name/content validation contract (spec §4.1). Every entry point that
//! accepts a wire-supplied name or chat body runs through here; failures are
//! reported as `None`/`bool` rather than an error type, because the caller's
//! uniform response to invalid input is a silent drop, never a reply.

pub const MAX_NAME_BYTES: usize = 50;
pub const MAX_CHAT_BYTES: usize = 500;

/// UTF-8, trimmed, non-empty, <= 50 bytes, no control characters (newlines included).
pub fn validate_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.len() > MAX_NAME_BYTES {
        return None;
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return None;
    }
    Some(trimmed.to_string())
}

/// Chat content: <= 500 bytes. Emptiness is allowed here — callers decide
/// whether an empty body is acceptable (only when a file attachment covers it).
pub fn validate_chat_content(raw: &str) -> bool {
    raw.len() <= MAX_CHAT_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_name_lengths() {
        assert!(validate_name(&"a".repeat(50)).is_some());
        assert!(validate_name(&"a".repeat(51)).is_none());
    }

    #[test]
    fn boundary_chat_lengths() {
        assert!(validate_chat_content(&"a".repeat(500)));
        assert!(!validate_chat_content(&"a".repeat(501)));
    }

    #[test]
    fn rejects_control_characters_and_blank() {
        assert!(validate_name("a\nb").is_none());
        assert!(validate_name("   ").is_none());
        assert_eq!(validate_name("  Alice  ").as_deref(), Some("Alice"));
    }
}
