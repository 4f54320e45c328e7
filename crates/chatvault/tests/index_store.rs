use std::path::PathBuf;

use chatvault::models::{ConversationRecord, Platform};
use chatvault::sqlite::{
    ConversationQuery, conversations_by_date_range, conversations_by_platform,
    count_conversations, delete_conversation, get_conversation, list_conversations, open_index,
    query_conversations, search_conversations, upsert_conversation,
};
use rusqlite::Connection;

fn temp_db_path(label: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock should be after epoch")
        .as_nanos();
    std::env::temp_dir()
        .join(format!("chatvault-{label}-{nanos}"))
        .join("index.db")
}

fn record(id: &str, platform: Platform, date: &str, title: &str) -> ConversationRecord {
    ConversationRecord {
        id: id.to_string(),
        platform,
        date: date.to_string(),
        title: title.to_string(),
        summary: format!("Discussion about: {title}"),
        tags: vec!["rust".to_string(), "error-handling".to_string()],
        topics: vec!["Result".to_string()],
        token_estimate: 120,
        message_count: 4,
        source_id: None,
        file_path: format!("{}/{}/{id}_full.json", platform.as_str(), &date[..7]),
        imported_at: "2024-06-01T00:00:00.000Z".to_string(),
    }
}

fn seeded() -> Connection {
    let connection = open_index(&temp_db_path("index-store")).expect("index should open");
    for row in [
        record("aaa111", Platform::Claude, "2024-01-15", "Rust error handling"),
        record("bbb222", Platform::Chatgpt, "2024-02-03", "Docker compose networking"),
        record("ccc333", Platform::Claude, "2024-03-20", "Sourdough starter tips"),
    ] {
        upsert_conversation(&connection, &row).expect("seed upsert should succeed");
    }
    connection
}

#[test]
fn open_creates_parent_directories_and_schema() {
    let path = temp_db_path("index-open");
    let connection = open_index(&path).expect("index should open");
    assert!(path.is_file());
    assert_eq!(count_conversations(&connection).expect("count"), 0);
}

#[test]
fn upsert_replaces_rows_by_id() {
    let connection = seeded();
    let mut updated = record("aaa111", Platform::Claude, "2024-01-15", "Lifetimes explained");
    updated.tags = vec!["rust".to_string()];
    upsert_conversation(&connection, &updated).expect("upsert should succeed");

    assert_eq!(count_conversations(&connection).expect("count"), 3);
    let stored = get_conversation(&connection, "aaa111")
        .expect("lookup should succeed")
        .expect("row should exist");
    assert_eq!(stored, updated);
    assert_eq!(get_conversation(&connection, "missing").expect("lookup"), None);
}

#[test]
fn full_text_index_follows_updates_and_deletes() {
    let connection = seeded();
    assert!(search_conversations(&connection, "lifetimes", 10).expect("search").is_empty());

    let mut updated = record("aaa111", Platform::Claude, "2024-01-15", "Lifetimes explained");
    updated.summary = "Borrowing".to_string();
    updated.tags.clear();
    upsert_conversation(&connection, &updated).expect("upsert should succeed");

    let hits = search_conversations(&connection, "lifetimes", 10).expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.id, "aaa111");
    assert!(hits[0].rank.is_some());

    let rust_hits = search_conversations(&connection, "rust", 10).expect("search");
    assert_eq!(rust_hits.len(), 2);
    assert!(rust_hits.iter().all(|hit| hit.record.id != "aaa111"));

    assert!(delete_conversation(&connection, "aaa111").expect("delete"));
    assert!(!delete_conversation(&connection, "aaa111").expect("second delete"));
    assert!(search_conversations(&connection, "lifetimes", 10).expect("search").is_empty());
}

#[test]
fn search_matches_tags_topics_and_ids_with_implicit_and() {
    let connection = seeded();

    let by_tag = search_conversations(&connection, "handling", 10).expect("search");
    assert_eq!(by_tag.len(), 3);

    let both = search_conversations(&connection, "docker networking", 10).expect("search");
    assert_eq!(both.len(), 1);
    assert_eq!(both[0].record.id, "bbb222");

    assert!(search_conversations(&connection, "docker sourdough", 10).expect("search").is_empty());
    assert_eq!(search_conversations(&connection, "ccc333", 10).expect("search").len(), 1);
    assert_eq!(search_conversations(&connection, "handling", 2).expect("search").len(), 2);
}

#[test]
fn fts_syntax_in_user_input_is_treated_as_text() {
    let connection = seeded();
    for input in ["\"unbalanced", "rust OR", "NEAR(rust", "title:rust", "-docker"] {
        search_conversations(&connection, input, 10)
            .unwrap_or_else(|error| panic!("query {input:?} should not error: {error:#}"));
    }
    assert!(search_conversations(&connection, "   ", 10).expect("search").is_empty());
}

#[test]
fn date_range_is_inclusive_and_platform_filter_exact() {
    let connection = seeded();

    let january_to_february: Vec<String> =
        conversations_by_date_range(&connection, "2024-01-15", "2024-02-03")
            .expect("range query")
            .into_iter()
            .map(|row| row.id)
            .collect();
    assert_eq!(january_to_february, vec!["bbb222", "aaa111"]);

    let claude: Vec<String> = conversations_by_platform(&connection, Platform::Claude)
        .expect("platform query")
        .into_iter()
        .map(|row| row.id)
        .collect();
    assert_eq!(claude, vec!["ccc333", "aaa111"]);

    let listed: Vec<String> = list_conversations(&connection)
        .expect("list")
        .into_iter()
        .map(|row| row.id)
        .collect();
    assert_eq!(listed, vec!["aaa111", "bbb222", "ccc333"]);
}

#[test]
fn combined_filters_narrow_full_text_results() {
    let connection = seeded();
    let query = ConversationQuery {
        text: Some("handling".to_string()),
        platform: Some(Platform::Claude),
        date_from: Some("2024-03-01".to_string()),
        ..ConversationQuery::default()
    };
    let hits = query_conversations(&connection, &query).expect("query");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.id, "ccc333");

    let by_id = ConversationQuery {
        id: Some("bbb222".to_string()),
        ..ConversationQuery::default()
    };
    let hits = query_conversations(&connection, &by_id).expect("query");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].rank, None);
}
