use std::path::Path;

use anyhow::{Context, Result, anyhow};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde::Serialize;
use tracing::debug;

use crate::models::{ConversationRecord, Platform};
use crate::utils::time::{format_unix_ms, now_unix_ms};

pub const INDEX_SCHEMA_VERSION: &str = "chatvault.index.v1";
pub const INDEX_FILE_NAME: &str = "index.db";
pub const CONVERSATIONS_TABLE: &str = "conversations";
pub const CONVERSATIONS_FTS_TABLE: &str = "conversations_fts";
pub const SCHEMA_META_TABLE: &str = "index_schema_meta";
pub const DEFAULT_QUERY_LIMIT: usize = 50;

pub const CONVERSATION_COLUMNS: &[&str] = &[
    "id",
    "platform",
    "date",
    "title",
    "summary",
    "tags",
    "topics",
    "file_path",
    "tokens_estimate",
    "message_count",
    "source_id",
    "imported_at",
];

const LIST_SEPARATOR: &str = ",";

const CREATE_CONVERSATIONS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT NOT NULL PRIMARY KEY,
    platform TEXT NOT NULL,
    date TEXT NOT NULL,
    title TEXT NOT NULL,
    summary TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '',
    topics TEXT NOT NULL DEFAULT '',
    file_path TEXT NOT NULL,
    tokens_estimate INTEGER NOT NULL DEFAULT 0,
    message_count INTEGER NOT NULL DEFAULT 0,
    source_id TEXT,
    imported_at TEXT NOT NULL,
    CHECK (platform IN ('claude', 'chatgpt')),
    CHECK (tokens_estimate >= 0),
    CHECK (message_count >= 0)
);
"#;

const CREATE_INDEX_DATE_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_conversations_date
ON conversations (date);
"#;

const CREATE_INDEX_PLATFORM_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_conversations_platform
ON conversations (platform, date);
"#;

const CREATE_FTS_TABLE_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS conversations_fts USING fts5(
    id,
    title,
    summary,
    tags,
    topics,
    content='conversations',
    content_rowid='rowid'
);
"#;

const CREATE_FTS_INSERT_TRIGGER_SQL: &str = r#"
CREATE TRIGGER IF NOT EXISTS conversations_fts_insert AFTER INSERT ON conversations BEGIN
    INSERT INTO conversations_fts (rowid, id, title, summary, tags, topics)
    VALUES (new.rowid, new.id, new.title, new.summary, new.tags, new.topics);
END;
"#;

const CREATE_FTS_DELETE_TRIGGER_SQL: &str = r#"
CREATE TRIGGER IF NOT EXISTS conversations_fts_delete AFTER DELETE ON conversations BEGIN
    INSERT INTO conversations_fts (conversations_fts, rowid, id, title, summary, tags, topics)
    VALUES ('delete', old.rowid, old.id, old.title, old.summary, old.tags, old.topics);
END;
"#;

const CREATE_FTS_UPDATE_TRIGGER_SQL: &str = r#"
CREATE TRIGGER IF NOT EXISTS conversations_fts_update AFTER UPDATE ON conversations BEGIN
    INSERT INTO conversations_fts (conversations_fts, rowid, id, title, summary, tags, topics)
    VALUES ('delete', old.rowid, old.id, old.title, old.summary, old.tags, old.topics);
    INSERT INTO conversations_fts (rowid, id, title, summary, tags, topics)
    VALUES (new.rowid, new.id, new.title, new.summary, new.tags, new.topics);
END;
"#;

const CREATE_META_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS index_schema_meta (
    schema_version TEXT NOT NULL,
    applied_at_utc TEXT NOT NULL
);
"#;

#[must_use]
pub fn schema_statements() -> &'static [&'static str] {
    &[
        CREATE_CONVERSATIONS_TABLE_SQL,
        CREATE_INDEX_DATE_SQL,
        CREATE_INDEX_PLATFORM_SQL,
        CREATE_FTS_TABLE_SQL,
        CREATE_FTS_INSERT_TRIGGER_SQL,
        CREATE_FTS_DELETE_TRIGGER_SQL,
        CREATE_FTS_UPDATE_TRIGGER_SQL,
        CREATE_META_TABLE_SQL,
    ]
}

#[must_use]
pub fn create_schema_sql() -> String {
    schema_statements().join("\n")
}

/// Filters for [`query_conversations`]. Every populated field narrows the
/// result; `text` runs through the full-text index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationQuery {
    pub id: Option<String>,
    pub platform: Option<Platform>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub text: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub record: ConversationRecord,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<f64>,
}

pub fn open_index_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create index parent directory: {}",
                parent.display()
            )
        })?;
    }

    Connection::open(path)
        .with_context(|| format!("failed to open index database: {}", path.display()))
}

/// Opens the index at `path` and makes sure the schema exists.
pub fn open_index(path: &Path) -> Result<Connection> {
    let connection = open_index_connection(path)?;
    ensure_index_schema(&connection)?;
    Ok(connection)
}

pub fn ensure_index_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(&create_schema_sql())
        .context("failed to create index schema")?;

    if schema_meta_has_version(connection, INDEX_SCHEMA_VERSION)? {
        return Ok(());
    }

    connection
        .execute(
            &format!(
                "INSERT INTO {SCHEMA_META_TABLE} (schema_version, applied_at_utc) VALUES (?1, ?2)"
            ),
            params![INDEX_SCHEMA_VERSION, format_unix_ms(now_unix_ms())],
        )
        .context("failed to write index schema meta row")?;

    Ok(())
}

fn schema_meta_has_version(connection: &Connection, schema_version: &str) -> Result<bool> {
    let query = format!(
        "SELECT EXISTS(SELECT 1 FROM {SCHEMA_META_TABLE} WHERE schema_version = ?1 LIMIT 1)"
    );
    let exists = connection
        .query_row(&query, [schema_version], |row| row.get::<usize, i64>(0))
        .context("failed to query index schema version metadata")?;
    Ok(exists != 0)
}

/// Insert-or-replace keyed by `id`. The full-text index follows through
/// the table triggers.
pub fn upsert_conversation(connection: &Connection, record: &ConversationRecord) -> Result<()> {
    let values = record_values(record)?;
    connection
        .prepare_cached(&build_upsert_sql())
        .context("failed to prepare conversation upsert")?
        .execute(params_from_iter(values))
        .with_context(|| format!("failed to upsert conversation id={}", record.id))?;
    debug!(id = %record.id, platform = %record.platform, "upserted index row");
    Ok(())
}

pub fn get_conversation(connection: &Connection, id: &str) -> Result<Option<ConversationRecord>> {
    let query = format!(
        "SELECT {} FROM {CONVERSATIONS_TABLE} WHERE id = ?1",
        CONVERSATION_COLUMNS.join(", ")
    );
    connection
        .query_row(&query, [id], row_to_record)
        .optional()
        .with_context(|| format!("failed to look up conversation id={id}"))
}

pub fn delete_conversation(connection: &Connection, id: &str) -> Result<bool> {
    let deleted = connection
        .execute(
            &format!("DELETE FROM {CONVERSATIONS_TABLE} WHERE id = ?1"),
            [id],
        )
        .with_context(|| format!("failed to delete conversation id={id}"))?;
    Ok(deleted > 0)
}

pub fn count_conversations(connection: &Connection) -> Result<u64> {
    let count = connection
        .query_row(
            &format!("SELECT COUNT(*) FROM {CONVERSATIONS_TABLE}"),
            [],
            |row| row.get::<usize, i64>(0),
        )
        .context("failed to count conversations")?;
    Ok(u64::try_from(count).unwrap_or_default())
}

/// Every row, oldest date first.
pub fn list_conversations(connection: &Connection) -> Result<Vec<ConversationRecord>> {
    let query = format!(
        "SELECT {} FROM {CONVERSATIONS_TABLE} ORDER BY date ASC, id ASC",
        CONVERSATION_COLUMNS.join(", ")
    );
    let mut statement = connection
        .prepare(&query)
        .context("failed to prepare conversation listing")?;
    let rows = statement
        .query_map([], row_to_record)
        .context("failed to list conversations")?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to decode conversation row")
}

/// Conversations dated within `[from, to]` (inclusive, `YYYY-MM-DD`).
pub fn conversations_by_date_range(
    connection: &Connection,
    from: &str,
    to: &str,
) -> Result<Vec<ConversationRecord>> {
    let query = ConversationQuery {
        date_from: Some(from.to_string()),
        date_to: Some(to.to_string()),
        limit: Some(usize::MAX),
        ..ConversationQuery::default()
    };
    Ok(into_records(query_conversations(connection, &query)?))
}

pub fn conversations_by_platform(
    connection: &Connection,
    platform: Platform,
) -> Result<Vec<ConversationRecord>> {
    let query = ConversationQuery {
        platform: Some(platform),
        limit: Some(usize::MAX),
        ..ConversationQuery::default()
    };
    Ok(into_records(query_conversations(connection, &query)?))
}

/// Full-text search over id, title, summary, tags and topics.
pub fn search_conversations(
    connection: &Connection,
    text: &str,
    limit: usize,
) -> Result<Vec<SearchHit>> {
    let query = ConversationQuery {
        text: Some(text.to_string()),
        limit: Some(limit),
        ..ConversationQuery::default()
    };
    query_conversations(connection, &query)
}

pub fn query_conversations(
    connection: &Connection,
    query: &ConversationQuery,
) -> Result<Vec<SearchHit>> {
    let match_expression = query.text.as_deref().and_then(fts_match_expression);
    if query.text.is_some() && match_expression.is_none() {
        return Ok(Vec::new());
    }

    let columns = CONVERSATION_COLUMNS
        .iter()
        .map(|column| format!("c.{column}"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = match match_expression {
        Some(_) => format!(
            "SELECT {columns}, rank FROM {CONVERSATIONS_FTS_TABLE} fts
             JOIN {CONVERSATIONS_TABLE} c ON c.rowid = fts.rowid
             WHERE {CONVERSATIONS_FTS_TABLE} MATCH ?"
        ),
        None => format!("SELECT {columns}, NULL FROM {CONVERSATIONS_TABLE} c WHERE 1 = 1"),
    };
    let mut values: Vec<SqlValue> = Vec::new();
    if let Some(expression) = &match_expression {
        values.push(SqlValue::Text(expression.clone()));
    }
    if let Some(id) = &query.id {
        sql.push_str(" AND c.id = ?");
        values.push(SqlValue::Text(id.clone()));
    }
    if let Some(platform) = query.platform {
        sql.push_str(" AND c.platform = ?");
        values.push(SqlValue::Text(platform.as_str().to_string()));
    }
    if let Some(from) = &query.date_from {
        sql.push_str(" AND c.date >= ?");
        values.push(SqlValue::Text(from.clone()));
    }
    if let Some(to) = &query.date_to {
        sql.push_str(" AND c.date <= ?");
        values.push(SqlValue::Text(to.clone()));
    }
    if match_expression.is_some() {
        sql.push_str(" ORDER BY rank, c.date DESC, c.id ASC");
    } else {
        sql.push_str(" ORDER BY c.date DESC, c.id ASC");
    }
    sql.push_str(" LIMIT ?");
    let limit = query.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
    values.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));

    let mut statement = connection
        .prepare(&sql)
        .context("failed to prepare conversation query")?;
    let rows = statement
        .query_map(params_from_iter(values), |row| {
            Ok(SearchHit {
                record: row_to_record(row)?,
                rank: row.get::<usize, Option<f64>>(CONVERSATION_COLUMNS.len())?,
            })
        })
        .context("failed to execute conversation query")?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to decode conversation query row")
}

/// Quotes every whitespace-separated token so user input can never be read
/// as FTS5 syntax. Tokens are implicitly AND-ed.
#[must_use]
pub fn fts_match_expression(text: &str) -> Option<String> {
    let tokens: Vec<String> = text
        .split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    }
}

fn into_records(hits: Vec<SearchHit>) -> Vec<ConversationRecord> {
    hits.into_iter().map(|hit| hit.record).collect()
}

fn build_upsert_sql() -> String {
    let placeholders = (1..=CONVERSATION_COLUMNS.len())
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ");
    let upsert_assignments = CONVERSATION_COLUMNS
        .iter()
        .filter(|column| **column != "id")
        .map(|column| format!("{column} = excluded.{column}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {CONVERSATIONS_TABLE} ({}) VALUES ({placeholders})
         ON CONFLICT(id) DO UPDATE SET {upsert_assignments}",
        CONVERSATION_COLUMNS.join(", "),
    )
}

fn record_values(record: &ConversationRecord) -> Result<Vec<SqlValue>> {
    Ok(vec![
        SqlValue::Text(record.id.clone()),
        SqlValue::Text(record.platform.as_str().to_string()),
        SqlValue::Text(record.date.clone()),
        SqlValue::Text(record.title.clone()),
        SqlValue::Text(record.summary.clone()),
        SqlValue::Text(record.tags.join(LIST_SEPARATOR)),
        SqlValue::Text(record.topics.join(LIST_SEPARATOR)),
        SqlValue::Text(record.file_path.clone()),
        SqlValue::Integer(to_i64(record.token_estimate, "tokens_estimate")?),
        SqlValue::Integer(to_i64(record.message_count, "message_count")?),
        record
            .source_id
            .clone()
            .map_or(SqlValue::Null, SqlValue::Text),
        SqlValue::Text(record.imported_at.clone()),
    ])
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ConversationRecord> {
    let platform_key: String = row.get(1)?;
    let platform = platform_key.parse::<Platform>().map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            error.into(),
        )
    })?;

    Ok(ConversationRecord {
        id: row.get(0)?,
        platform,
        date: row.get(2)?,
        title: row.get(3)?,
        summary: row.get(4)?,
        tags: split_list(&row.get::<usize, String>(5)?),
        topics: split_list(&row.get::<usize, String>(6)?),
        file_path: row.get(7)?,
        token_estimate: u64::try_from(row.get::<usize, i64>(8)?).unwrap_or_default(),
        message_count: u64::try_from(row.get::<usize, i64>(9)?).unwrap_or_default(),
        source_id: row.get(10)?,
        imported_at: row.get(11)?,
    })
}

fn split_list(joined: &str) -> Vec<String> {
    joined
        .split(LIST_SEPARATOR)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn to_i64(value: u64, field: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("{field} exceeds sqlite INTEGER range"))
}
