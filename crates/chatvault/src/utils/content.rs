use serde_json::Value;

const PRIORITY_TEXT_KEYS: &[&str] = &["text", "content", "parts", "value", "message", "body"];

const NON_CONTENT_KEYS: &[&str] = &[
    "id",
    "type",
    "content_type",
    "role",
    "name",
    "model",
    "timestamp",
    "created_at",
    "updated_at",
    "create_time",
    "update_time",
    "status",
    "index",
    "citations",
    "metadata",
];

/// Flattens a JSON fragment into plain text.
///
/// Strings are returned as-is, arrays are joined with newlines and objects
/// are searched through the usual text-bearing keys before falling back to
/// every remaining non-structural field in key order.
#[must_use]
pub fn extract_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => non_empty_text(text),
        Value::Array(items) => {
            let fragments: Vec<String> = items.iter().filter_map(extract_text).collect();
            join_fragments(&fragments)
        }
        Value::Object(map) => {
            for key in PRIORITY_TEXT_KEYS {
                if let Some(value) = map.get(*key)
                    && let Some(text) = extract_text(value)
                {
                    return Some(text);
                }
            }

            let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
            keys.sort_unstable();

            let fragments: Vec<String> = keys
                .into_iter()
                .filter(|key| !PRIORITY_TEXT_KEYS.contains(key) && !NON_CONTENT_KEYS.contains(key))
                .filter_map(|key| map.get(key))
                .filter_map(extract_text)
                .collect();

            join_fragments(&fragments)
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => None,
    }
}

/// First `max_chars` characters of `text`, never splitting a code point.
#[must_use]
pub fn prefix_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

#[must_use]
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trimmed string field, `None` when absent, not a string, or blank.
#[must_use]
pub fn string_field(value: Option<&Value>) -> Option<String> {
    let text = value?.as_str()?.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Untrimmed string field, `None` when absent, not a string, or blank.
#[must_use]
pub fn verbatim_field(value: Option<&Value>) -> Option<String> {
    value?
        .as_str()
        .filter(|text| !text.trim().is_empty())
        .map(str::to_string)
}

fn non_empty_text(text: &str) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn join_fragments(fragments: &[String]) -> Option<String> {
    if fragments.is_empty() {
        return None;
    }

    Some(fragments.join("\n"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{extract_text, normalize_whitespace, prefix_chars, string_field, verbatim_field};

    #[test]
    fn flattens_typed_content_blocks() {
        let value = json!([
            {"type": "text", "text": "first block"},
            {"type": "image", "id": "img-1"},
            {"type": "text", "text": "second block"}
        ]);
        assert_eq!(
            extract_text(&value).as_deref(),
            Some("first block\nsecond block")
        );
    }

    #[test]
    fn falls_back_to_non_structural_keys() {
        let value = json!({"type": "code", "language": "rust", "id": "x"});
        assert_eq!(extract_text(&value).as_deref(), Some("rust"));
        assert_eq!(extract_text(&json!({"id": "x"})), None);
    }

    #[test]
    fn prefix_respects_char_boundaries() {
        assert_eq!(prefix_chars("héllo wörld", 4), "héll");
        assert_eq!(prefix_chars("short", 10), "short");
        assert_eq!(prefix_chars("", 3), "");
    }

    #[test]
    fn whitespace_and_string_field_helpers() {
        assert_eq!(normalize_whitespace("  a \n b\t c "), "a b c");
        assert_eq!(string_field(Some(&json!("  t  "))).as_deref(), Some("t"));
        assert_eq!(string_field(Some(&json!("   "))), None);
        assert_eq!(string_field(Some(&json!(3))), None);
        assert_eq!(string_field(None), None);
        assert_eq!(
            verbatim_field(Some(&json!("  t  "))).as_deref(),
            Some("  t  ")
        );
        assert_eq!(verbatim_field(Some(&json!(" \n "))), None);
    }
}
