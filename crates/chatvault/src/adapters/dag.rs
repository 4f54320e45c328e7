use anyhow::{Result, bail};
use serde_json::{Map, Value};

use crate::adapters::tree::{self, BranchPolicy};
use crate::models::{CanonicalMessage, ParsedConversation, Role};
use crate::utils::content::{self, string_field, verbatim_field};
use crate::utils::time::{format_unix_ms, timestamp_from_value};

pub const EXPORT_FILE_NAME: &str = "conversations.json";

/// Splits a branching-platform export into its conversations.
///
/// Exports are either an array of conversations or one bare conversation.
pub fn conversation_list(document: Value) -> Result<Vec<Value>> {
    match document {
        Value::Array(items) => Ok(items),
        Value::Object(_) => Ok(vec![document]),
        other => bail!(
            "expected a conversation object or array at the document root, found {}",
            json_kind(&other)
        ),
    }
}

pub fn parse_conversation(value: &Value, policy: BranchPolicy) -> Result<ParsedConversation> {
    let Some(conversation) = value.as_object() else {
        bail!("conversation must be a JSON object, found {}", json_kind(value));
    };

    let mut parsed = ParsedConversation {
        title: verbatim_field(conversation.get("title")),
        source_id: string_field(conversation.get("id"))
            .or_else(|| string_field(conversation.get("conversation_id"))),
        ..ParsedConversation::default()
    };

    if let Some(raw) = conversation.get("create_time").filter(|raw| !raw.is_null()) {
        match timestamp_from_value(raw) {
            Ok(unix_ms) => parsed.created_at_unix_ms = Some(unix_ms),
            Err(error) => parsed
                .warnings
                .push(format!("invalid `create_time` ({error}); using import time")),
        }
    }

    let Some(mapping) = conversation.get("mapping").and_then(Value::as_object) else {
        parsed
            .warnings
            .push("missing `mapping`; conversation has no messages".to_string());
        return Ok(parsed);
    };

    let selected_node = conversation.get("current_node").and_then(Value::as_str);
    let mut messages = Vec::new();
    tree::walk(mapping, selected_node, policy, |_, node| {
        if let Some(message) = node_message(node) {
            messages.push(message);
        }
    });
    if messages.is_empty() && !mapping.is_empty() && tree::root_ids(mapping).is_empty() {
        parsed
            .warnings
            .push("no root node found in `mapping`".to_string());
    }
    parsed.messages = messages;

    Ok(parsed)
}

/// Converts one mapping node into a canonical message.
///
/// Nodes without a message payload and hidden system messages yield `None`;
/// a payload with missing fields yields an empty assistant message.
#[must_use]
pub fn node_message(node: &Map<String, Value>) -> Option<CanonicalMessage> {
    let message = node.get("message")?.as_object()?;

    let role_label = message
        .get("author")
        .and_then(|author| author.get("role"))
        .and_then(Value::as_str)
        .or_else(|| message.get("role").and_then(Value::as_str));
    let role = Role::from_source(role_label);

    if role == Role::System && is_hidden(message) {
        return None;
    }

    let timestamp = message
        .get("create_time")
        .and_then(|raw| timestamp_from_value(raw).ok())
        .map(format_unix_ms);

    Some(
        CanonicalMessage::new(role, message_content(message.get("content")))
            .with_timestamp(timestamp),
    )
}

/// Resolves message text in fixed precedence: `parts`, then `text`, then
/// a nested `content` field. The first field carrying text wins even when
/// later fields disagree.
#[must_use]
pub fn message_content(content: Option<&Value>) -> String {
    let Some(content) = content else {
        return String::new();
    };

    let Some(object) = content.as_object() else {
        return content.as_str().map(str::to_string).unwrap_or_default();
    };

    if let Some(parts) = object.get("parts").and_then(Value::as_array)
        && let Some(text) = join_parts(parts)
    {
        return text;
    }

    if let Some(text) = object
        .get("text")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
    {
        return text.to_string();
    }

    object
        .get("content")
        .and_then(content::extract_text)
        .unwrap_or_default()
}

fn join_parts(parts: &[Value]) -> Option<String> {
    let fragments: Vec<String> = parts
        .iter()
        .filter_map(|part| match part {
            Value::String(text) if !text.is_empty() => Some(text.clone()),
            Value::String(_) | Value::Null => None,
            Value::Number(number) => Some(number.to_string()),
            Value::Bool(flag) => Some(flag.to_string()),
            other => content::extract_text(other),
        })
        .collect();

    if fragments.is_empty() {
        None
    } else {
        Some(fragments.join("\n"))
    }
}

fn is_hidden(message: &Map<String, Value>) -> bool {
    message
        .get("metadata")
        .and_then(|metadata| metadata.get("is_visually_hidden_from_conversation"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
