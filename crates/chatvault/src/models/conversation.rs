use std::fmt::{Display, Formatter};
use std::str::FromStr;

use anyhow::bail;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ARTIFACT_SCHEMA_VERSION: &str = "chatvault.conversation.v1";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Claude,
    Chatgpt,
}

impl Platform {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Chatgpt => "chatgpt",
        }
    }
}

#[must_use]
pub const fn all_platforms() -> [Platform; 2] {
    [Platform::Claude, Platform::Chatgpt]
}

impl Display for Platform {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "claude" => Ok(Self::Claude),
            "chatgpt" => Ok(Self::Chatgpt),
            other => bail!("unknown platform `{other}`"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Maps a platform role label onto the canonical role set.
    ///
    /// Unknown and missing labels land on `Assistant`: everything that is not
    /// the human or the platform itself speaks on the model's side.
    #[must_use]
    pub fn from_source(label: Option<&str>) -> Self {
        match label.map(|label| label.trim().to_ascii_lowercase()).as_deref() {
            Some("user" | "human") => Self::User,
            Some("system") => Self::System,
            _ => Self::Assistant,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CanonicalMessage {
    pub role: Role,
    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl CanonicalMessage {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: None,
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: Option<String>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// What a platform adapter hands to the rest of the pipeline.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedConversation {
    pub messages: Vec<CanonicalMessage>,
    pub title: Option<String>,
    pub created_at_unix_ms: Option<u64>,
    pub source_id: Option<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConversationRecord {
    pub id: String,
    pub platform: Platform,
    /// Calendar creation date, `YYYY-MM-DD`.
    pub date: String,
    pub title: String,
    pub summary: String,
    pub tags: Vec<String>,
    pub topics: Vec<String>,
    pub token_estimate: u64,
    pub message_count: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,

    pub file_path: String,
    pub imported_at: String,
}

impl ConversationRecord {
    /// `YYYY-MM` partition the record's artifacts live under.
    #[must_use]
    pub fn year_month(&self) -> &str {
        self.date.get(..7).unwrap_or(self.date.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FullArtifact {
    pub schema_version: String,
    pub record: ConversationRecord,
    pub messages: Vec<CanonicalMessage>,
    pub source: Value,
}

impl FullArtifact {
    #[must_use]
    pub fn new(record: ConversationRecord, messages: Vec<CanonicalMessage>, source: Value) -> Self {
        Self {
            schema_version: ARTIFACT_SCHEMA_VERSION.to_string(),
            record,
            messages,
            source,
        }
    }
}

#[must_use]
pub fn artifact_json_schema() -> Value {
    let schema = schemars::schema_for!(FullArtifact);
    match serde_json::to_value(schema) {
        Ok(value) => value,
        Err(error) => {
            panic!("failed to serialize generated artifact schema: {error}");
        }
    }
}
