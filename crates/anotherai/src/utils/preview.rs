//! Human-readable previews of JSON payloads.

use serde_json::Value;

/// Render a short, single-line preview of a JSON value, truncated to
/// `max_len` characters (an ellipsis is appended when truncating).
pub fn compute_preview(value: &Value, max_len: usize) -> String {
    let rendered = match value {
        Value::String(s) => format!("\"{}\"", s.replace('\n', " ")),
        Value::Null => "null".to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    };
    truncate(&rendered, max_len)
}

/// Preview of a raw string (no quoting).
pub fn preview_str(s: &str, max_len: usize) -> String {
    truncate(&s.replace('\n', " "), max_len)
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_len.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn long_values_are_truncated() {
        let preview = compute_preview(&json!("a".repeat(100)), 10);
        assert_eq!(preview.chars().count(), 10);
        assert!(preview.ends_with('…'));
    }

    #[test]
    fn short_values_pass_through() {
        assert_eq!(compute_preview(&json!({"a": 1}), 30), r#"{"a":1}"#);
        assert_eq!(compute_preview(&json!("hi"), 30), "\"hi\"");
    }
}
