use std::collections::HashSet;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;

use crate::models::{CanonicalMessage, Role};
use crate::utils::content::{normalize_whitespace, prefix_chars};

pub const UNTITLED_CONVERSATION: &str = "Untitled Conversation";
pub const NO_SUMMARY: &str = "No summary available";
pub const GENERIC_SUMMARY: &str = "Conversation between user and AI assistant";

pub const TITLE_SOURCE_CHARS: usize = 100;
pub const TITLE_MAX_CHARS: usize = 60;
pub const SUMMARY_EXCERPT_CHARS: usize = 200;
pub const MAX_TAGS: usize = 5;
pub const MAX_TOPICS: usize = 10;
pub const CHARS_PER_TOKEN: u64 = 4;

/// Keyword to tag table. Matching is a case-insensitive substring test and
/// results keep this definition order.
pub const TAG_KEYWORDS: &[(&str, &str)] = &[
    ("python", "python"),
    ("rust", "rust"),
    ("javascript", "javascript"),
    ("typescript", "typescript"),
    ("react", "react"),
    ("sql", "database"),
    ("api", "api"),
    ("debug", "debugging"),
    ("error", "error-handling"),
    ("test", "testing"),
    ("deploy", "deployment"),
    ("docker", "docker"),
    ("git", "git"),
    ("cli", "cli"),
    ("web", "web"),
    ("ai", "ai"),
    ("llm", "llm"),
    ("machine learning", "ml"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedMetadata {
    pub title: String,
    pub summary: String,
    pub tags: Vec<String>,
    pub topics: Vec<String>,
    pub token_estimate: u64,
}

pub fn derive_metadata(
    explicit_title: Option<&str>,
    messages: &[CanonicalMessage],
    source: &Value,
) -> Result<DerivedMetadata> {
    Ok(DerivedMetadata {
        title: derive_title(explicit_title, messages),
        summary: derive_summary(messages),
        tags: derive_tags(messages),
        topics: derive_topics(messages),
        token_estimate: estimate_tokens(source)?,
    })
}

/// Explicit title verbatim, else a cleaned prefix of the first user message,
/// else [`UNTITLED_CONVERSATION`].
#[must_use]
pub fn derive_title(explicit_title: Option<&str>, messages: &[CanonicalMessage]) -> String {
    if let Some(title) = explicit_title.filter(|title| !title.trim().is_empty()) {
        return title.to_string();
    }

    messages
        .iter()
        .find(|message| message.role == Role::User)
        .map(|message| clean_title(prefix_chars(&message.content, TITLE_SOURCE_CHARS)))
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| UNTITLED_CONVERSATION.to_string())
}

#[must_use]
pub fn clean_title(text: &str) -> String {
    let stripped = title_strip_regex().replace_all(text, "");
    let collapsed = normalize_whitespace(&stripped);
    if collapsed.chars().count() > TITLE_MAX_CHARS {
        format!("{}...", prefix_chars(&collapsed, TITLE_MAX_CHARS))
    } else {
        collapsed
    }
}

#[must_use]
pub fn derive_summary(messages: &[CanonicalMessage]) -> String {
    if messages.is_empty() {
        return NO_SUMMARY.to_string();
    }

    let user_messages: Vec<&CanonicalMessage> = messages
        .iter()
        .filter(|message| message.role == Role::User)
        .collect();

    match user_messages.as_slice() {
        [] => GENERIC_SUMMARY.to_string(),
        [only] => format!(
            "Discussion about: {}",
            prefix_chars(&only.content, SUMMARY_EXCERPT_CHARS)
        ),
        [first, .., last] => format!(
            "Started with: {}\n\nEnded with: {}",
            prefix_chars(&first.content, SUMMARY_EXCERPT_CHARS),
            prefix_chars(&last.content, SUMMARY_EXCERPT_CHARS)
        ),
    }
}

#[must_use]
pub fn derive_tags(messages: &[CanonicalMessage]) -> Vec<String> {
    let haystack = joined_content(messages).to_lowercase();
    let mut tags: Vec<String> = Vec::new();
    for (keyword, tag) in TAG_KEYWORDS {
        if tags.len() == MAX_TAGS {
            break;
        }
        if haystack.contains(keyword) && !tags.iter().any(|existing| existing == tag) {
            tags.push((*tag).to_string());
        }
    }
    tags
}

/// Capitalised word runs in first-seen order, de-duplicated and capped.
#[must_use]
pub fn derive_topics(messages: &[CanonicalMessage]) -> Vec<String> {
    let text = joined_content(messages);
    let mut seen = HashSet::new();
    let mut topics = Vec::new();
    for found in topic_regex().find_iter(&text) {
        if topics.len() == MAX_TOPICS {
            break;
        }
        let topic = found.as_str();
        if seen.insert(topic) {
            topics.push(topic.to_string());
        }
    }
    topics
}

/// Compact JSON size of the source conversation divided by four.
pub fn estimate_tokens(source: &Value) -> Result<u64> {
    let encoded =
        serde_json::to_string(source).context("failed to serialize conversation for sizing")?;
    Ok(encoded.len() as u64 / CHARS_PER_TOKEN)
}

fn joined_content(messages: &[CanonicalMessage]) -> String {
    messages
        .iter()
        .map(|message| message.content.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_strip_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"[^\w\s-]").expect("title strip regex should compile"))
}

fn topic_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*\b").expect("topic regex should compile")
    })
}
