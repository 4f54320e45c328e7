use chatvault::adapters::{self, BranchPolicy};
use chatvault::models::{Platform, Role};
use serde_json::json;

#[test]
fn well_formed_messages_map_one_to_one_in_order() {
    let conversation = json!({
        "id": "c1",
        "title": "Rust Errors",
        "created_at": "2024-01-15T10:00:00Z",
        "messages": [
            {"role": "user", "content": "How do I handle errors?"},
            {"role": "assistant", "content": "Use a Result type."},
            {"role": "user", "content": "And panics?"},
            {"role": "assistant", "content": "  Reserve them for bugs.  "}
        ]
    });

    let parsed = adapters::parse_conversation(Platform::Claude, &conversation, BranchPolicy::default())
        .expect("linear conversation should parse");

    let roles: Vec<Role> = parsed.messages.iter().map(|message| message.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
    let contents: Vec<&str> = parsed
        .messages
        .iter()
        .map(|message| message.content.as_str())
        .collect();
    assert_eq!(
        contents,
        vec![
            "How do I handle errors?",
            "Use a Result type.",
            "And panics?",
            "  Reserve them for bugs.  "
        ]
    );
    assert_eq!(parsed.title.as_deref(), Some("Rust Errors"));
    assert_eq!(parsed.source_id.as_deref(), Some("c1"));
    assert_eq!(parsed.created_at_unix_ms, Some(1_705_312_800_000));
    assert!(parsed.warnings.is_empty());
}

#[test]
fn malformed_messages_degrade_to_empty_content() {
    let conversation = json!({
        "messages": [
            {"role": "user"},
            {"content": "no role here"},
            42
        ]
    });

    let parsed = adapters::parse_conversation(Platform::Claude, &conversation, BranchPolicy::default())
        .expect("malformed messages should not fail the conversation");

    assert_eq!(parsed.messages.len(), 3);
    assert_eq!(parsed.messages[0].role, Role::User);
    assert_eq!(parsed.messages[0].content, "");
    assert_eq!(parsed.messages[1].role, Role::Assistant);
    assert_eq!(parsed.messages[1].content, "no role here");
    assert_eq!(parsed.messages[2].content, "");
    assert_eq!(parsed.warnings.len(), 1);
}

#[test]
fn export_with_chat_messages_and_sender_labels() {
    let document = json!([
        {
            "uuid": "a-1",
            "name": "Project kickoff",
            "created_at": "2023-11-02T08:30:00.000000Z",
            "chat_messages": [
                {"sender": "human", "text": "Plan the sprint"},
                {"sender": "assistant", "content": [{"type": "text", "text": "Here is a plan"}]}
            ]
        }
    ]);

    let list = adapters::conversation_list(Platform::Claude, document).expect("export should split");
    assert_eq!(list.len(), 1);

    let parsed = adapters::parse_conversation(Platform::Claude, &list[0], BranchPolicy::default())
        .expect("conversation should parse");
    assert_eq!(parsed.title.as_deref(), Some("Project kickoff"));
    assert_eq!(parsed.source_id.as_deref(), Some("a-1"));
    assert_eq!(parsed.messages[0].role, Role::User);
    assert_eq!(parsed.messages[0].content, "Plan the sprint");
    assert_eq!(parsed.messages[1].content, "Here is a plan");
}

#[test]
fn missing_message_list_yields_empty_transcript_with_warning() {
    let parsed = adapters::parse_conversation(
        Platform::Claude,
        &json!({"id": "empty", "created_at": "not a date"}),
        BranchPolicy::default(),
    )
    .expect("missing messages should not raise");

    assert!(parsed.messages.is_empty());
    assert_eq!(parsed.created_at_unix_ms, None);
    assert_eq!(parsed.warnings.len(), 2);
}

#[test]
fn non_object_conversation_is_an_item_error() {
    let error = adapters::parse_conversation(Platform::Claude, &json!("broken"), BranchPolicy::default())
        .expect_err("a string is not a conversation");
    assert!(
        error.to_string().contains("must be a JSON object"),
        "unexpected error: {error}"
    );
}
