use anyhow::{Error, Result};
use clap::Args;
use serde_json::json;

use crate::config::RuntimePaths;
use crate::models::{EnvelopeErrorCode, Platform, QueryEnvelope, QueryEnvelopeCommandFailure};
use crate::sqlite::{self, ConversationQuery, DEFAULT_QUERY_LIMIT};
use crate::utils::time::parse_calendar_date;

const COMMAND: &str = "search";

#[derive(Debug, Clone, Args)]
pub struct SearchArgs {
    /// Full-text query over id, title, summary, tags and topics.
    #[arg(value_name = "QUERY")]
    pub query: Option<String>,

    #[arg(long, value_name = "ID")]
    pub id: Option<String>,

    #[arg(long, value_enum)]
    pub platform: Option<Platform>,

    /// Earliest conversation date, `YYYY-MM-DD` (inclusive).
    #[arg(long, value_name = "DATE")]
    pub from: Option<String>,

    /// Latest conversation date, `YYYY-MM-DD` (inclusive).
    #[arg(long, value_name = "DATE")]
    pub to: Option<String>,

    #[arg(long, default_value_t = DEFAULT_QUERY_LIMIT)]
    pub limit: usize,
}

pub fn run(args: &SearchArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let query = build_query(args)?;

    let index_path = runtime_paths.index_path();
    if !index_path.exists() {
        let envelope = QueryEnvelope::ok(COMMAND, json!({ "conversations": [] }))
            .with_meta("row_count", json!(0))
            .with_meta("index_path", json!(index_path.display().to_string()))
            .with_warning("index_missing", "no index found; import a conversation first");
        return print_envelope(&envelope);
    }

    let connection = sqlite::open_index(&index_path).map_err(|error| {
        failure(
            QueryEnvelope::error(
                COMMAND,
                EnvelopeErrorCode::IndexUnavailable,
                "unable to open index",
            )
            .with_error_details(json!({
                "index_path": index_path.display().to_string(),
                "cause": format!("{error:#}")
            })),
        )
    })?;

    let hits = sqlite::query_conversations(&connection, &query).map_err(|error| {
        failure(
            QueryEnvelope::error(COMMAND, EnvelopeErrorCode::QueryFailed, "index query failed")
            .with_error_details(json!({ "cause": format!("{error:#}") })),
        )
    })?;

    let row_count = hits.len();
    let envelope = QueryEnvelope::ok(COMMAND, json!({ "conversations": hits }))
        .with_meta("row_count", json!(row_count))
        .with_meta("limit", json!(args.limit))
        .with_meta("full_text", json!(query.text.is_some()))
        .with_meta("index_path", json!(index_path.display().to_string()));
    print_envelope(&envelope)
}

fn build_query(args: &SearchArgs) -> Result<ConversationQuery> {
    if args.limit == 0 {
        return Err(failure(
            QueryEnvelope::error(
                COMMAND,
                EnvelopeErrorCode::LimitInvalid,
                "limit must be greater than zero",
            )
            .with_error_details(json!({ "limit": args.limit })),
        ));
    }

    let date_from = args.from.as_deref().map(validated_date).transpose()?;
    let date_to = args.to.as_deref().map(validated_date).transpose()?;
    if let (Some(from), Some(to)) = (&date_from, &date_to)
        && from > to
    {
        return Err(failure(
            QueryEnvelope::error(
                COMMAND,
                EnvelopeErrorCode::DateRangeInvalid,
                "--from is after --to",
            )
            .with_error_details(json!({ "from": from, "to": to })),
        ));
    }

    Ok(ConversationQuery {
        id: args.id.clone(),
        platform: args.platform,
        date_from,
        date_to,
        text: args
            .query
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string),
        limit: Some(args.limit),
    })
}

fn validated_date(raw: &str) -> Result<String> {
    parse_calendar_date(raw).map_err(|error| {
        failure(
            QueryEnvelope::error(
                COMMAND,
                EnvelopeErrorCode::DateInvalid,
                "dates must be YYYY-MM-DD",
            )
            .with_error_details(json!({ "input": raw, "cause": format!("{error:#}") })),
        )
    })
}

fn failure(envelope: QueryEnvelope) -> Error {
    Error::new(QueryEnvelopeCommandFailure::new(envelope))
}

fn print_envelope(envelope: &QueryEnvelope) -> Result<()> {
    let encoded = serde_json::to_string(envelope).map_err(|error| {
        failure(
            QueryEnvelope::error(
                COMMAND,
                EnvelopeErrorCode::ResponseEncodeFailed,
                "failed to encode search response",
            )
            .with_error_details(json!({ "cause": format!("{error:#}") })),
        )
    })?;
    println!("{encoded}");
    Ok(())
}
