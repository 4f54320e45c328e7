use anyhow::{Result, bail};
use serde_json::{Map, Value};

use crate::adapters::dag::json_kind;
use crate::models::{CanonicalMessage, ParsedConversation, Role};
use crate::utils::content::{self, string_field, verbatim_field};
use crate::utils::time::{format_unix_ms, timestamp_from_value};

/// Splits a flat-history export into its conversations.
///
/// Accepts an array of conversations, an object wrapping them under
/// `conversations`, or one bare conversation object.
pub fn conversation_list(document: Value) -> Result<Vec<Value>> {
    match document {
        Value::Array(items) => Ok(items),
        Value::Object(mut object) => match object.remove("conversations") {
            Some(Value::Array(items)) => Ok(items),
            Some(other) => {
                object.insert("conversations".to_string(), other);
                Ok(vec![Value::Object(object)])
            }
            None => Ok(vec![Value::Object(object)]),
        },
        other => bail!(
            "expected a conversation object or array at the document root, found {}",
            json_kind(&other)
        ),
    }
}

pub fn parse_conversation(value: &Value) -> Result<ParsedConversation> {
    let Some(conversation) = value.as_object() else {
        bail!("conversation must be a JSON object, found {}", json_kind(value));
    };

    let mut parsed = ParsedConversation {
        title: verbatim_field(conversation.get("title"))
            .or_else(|| verbatim_field(conversation.get("name"))),
        source_id: string_field(conversation.get("id"))
            .or_else(|| string_field(conversation.get("uuid"))),
        ..ParsedConversation::default()
    };

    if let Some(raw) = conversation
        .get("created_at")
        .or_else(|| conversation.get("create_time"))
        .filter(|raw| !raw.is_null())
    {
        match timestamp_from_value(raw) {
            Ok(unix_ms) => parsed.created_at_unix_ms = Some(unix_ms),
            Err(error) => parsed
                .warnings
                .push(format!("invalid `created_at` ({error}); using import time")),
        }
    }

    let Some(items) = conversation
        .get("messages")
        .or_else(|| conversation.get("chat_messages"))
        .and_then(Value::as_array)
    else {
        parsed
            .warnings
            .push("missing `messages` array; conversation has no messages".to_string());
        return Ok(parsed);
    };

    parsed.messages = items
        .iter()
        .enumerate()
        .map(|(index, item)| match item.as_object() {
            Some(object) => map_message(object),
            None => {
                parsed.warnings.push(format!(
                    "message {}: expected an object, found {}",
                    index + 1,
                    json_kind(item)
                ));
                CanonicalMessage::new(
                    Role::Assistant,
                    content::extract_text(item).unwrap_or_default(),
                )
            }
        })
        .collect();

    Ok(parsed)
}

/// Maps one flat-history message. Missing fields degrade to defaults.
#[must_use]
pub fn map_message(object: &Map<String, Value>) -> CanonicalMessage {
    let role_label = object
        .get("role")
        .or_else(|| object.get("sender"))
        .and_then(Value::as_str);

    let content = match object.get("content") {
        Some(Value::String(text)) => Some(text.clone()),
        Some(other) => content::extract_text(other),
        None => None,
    }
    .filter(|text| !text.is_empty())
    .or_else(|| object.get("text").and_then(Value::as_str).map(str::to_string))
    .unwrap_or_default();

    let timestamp = ["timestamp", "created_at", "create_time"]
        .iter()
        .filter_map(|key| object.get(*key))
        .find_map(|raw| timestamp_from_value(raw).ok())
        .map(format_unix_ms);

    CanonicalMessage::new(Role::from_source(role_label), content).with_timestamp(timestamp)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{conversation_list, map_message};
    use crate::models::Role;

    #[test]
    fn wrapped_conversations_are_unwrapped() {
        let document = json!({"conversations": [{"id": "a"}, {"id": "b"}]});
        let list = conversation_list(document).expect("list should split");
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn bare_object_is_a_single_conversation() {
        let list = conversation_list(json!({"id": "solo", "messages": []})).expect("split");
        assert_eq!(list.len(), 1);
        assert!(conversation_list(json!("nope")).is_err());
    }

    #[test]
    fn sender_and_text_fields_are_understood() {
        let message = json!({"sender": "human", "text": "hi there", "created_at": "2024-01-15T10:00:00Z"});
        let mapped = map_message(message.as_object().expect("object"));
        assert_eq!(mapped.role, Role::User);
        assert_eq!(mapped.content, "hi there");
        assert_eq!(mapped.timestamp.as_deref(), Some("2024-01-15T10:00:00.000Z"));
    }

    #[test]
    fn content_block_lists_are_flattened() {
        let message = json!({"role": "assistant", "content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]});
        let mapped = map_message(message.as_object().expect("object"));
        assert_eq!(mapped.content, "a\nb");
    }

    #[test]
    fn missing_fields_yield_empty_assistant_message() {
        let mapped = map_message(json!({}).as_object().expect("object"));
        assert_eq!(mapped.role, Role::Assistant);
        assert_eq!(mapped.content, "");
    }
}
