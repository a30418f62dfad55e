use serde_json::Value;

/// Used when nothing survives sanitization
pub const UNKNOWN_SPEAKER: &str = "unknown_speaker";

/// Characters that are illegal in a path segment on at least one platform
const ILLEGAL_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Whether `token` can be used verbatim as part of a path segment
pub fn is_path_safe(token: &str) -> bool {
    !token.is_empty()
        && !token
            .chars()
            .any(|c| c.is_whitespace() || ILLEGAL_CHARS.contains(&c))
}

/// Turn an untrusted speaker identifier into a filesystem-safe token.
///
/// Illegal characters and whitespace become `_`, runs of `_` collapse to one,
/// and leading/trailing `_` are trimmed. Deterministic and idempotent.
pub fn sanitize_speaker_id(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = if c.is_whitespace() || ILLEGAL_CHARS.contains(&c) {
            '_'
        } else {
            c
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }

    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        UNKNOWN_SPEAKER.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Coerce a record's speaker field to text; `null` counts as absent
pub fn speaker_id_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
