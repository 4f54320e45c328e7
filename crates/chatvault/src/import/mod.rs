use std::fmt::{Display, Formatter};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::adapters::{self, BranchPolicy, dag::EXPORT_FILE_NAME, export_shape};
use crate::archive::{self, paths_from_file_path, record_paths, relative_full_path};
use crate::identity::conversation_id;
use crate::metadata::derive_metadata;
use crate::models::{ConversationRecord, FullArtifact, Platform};
use crate::reconcile::{self, ReconcileOptions, ReconcileReport};
use crate::sqlite::{self, INDEX_FILE_NAME};
use crate::utils::time::{calendar_date, format_unix_ms, now_unix_ms};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Per-call import settings. Built once and passed down; nothing in the
/// pipeline reads configuration from anywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    pub platform: Platform,
    pub branch_policy: BranchPolicy,
    pub reconcile_on_start: bool,
}

impl ImportOptions {
    #[must_use]
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            branch_policy: BranchPolicy::default(),
            reconcile_on_start: true,
        }
    }

    #[must_use]
    pub fn with_branch_policy(mut self, branch_policy: BranchPolicy) -> Self {
        self.branch_policy = branch_policy;
        self
    }

    #[must_use]
    pub fn with_reconcile_on_start(mut self, reconcile_on_start: bool) -> Self {
        self.reconcile_on_start = reconcile_on_start;
        self
    }
}

/// The input document itself is unusable. Aborts the whole batch.
#[derive(Debug)]
pub struct InputDocumentError {
    pub path: PathBuf,
    pub reason: String,
}

impl InputDocumentError {
    fn new(path: &Path, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

impl Display for InputDocumentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unusable input document {}: {}",
            self.path.display(),
            self.reason
        )
    }
}

impl std::error::Error for InputDocumentError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportedConversation {
    pub ordinal: usize,
    pub id: String,
    pub title: String,
    pub date: String,
    pub message_count: u64,
    pub file_path: String,
    pub replaced: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportFailure {
    pub ordinal: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub platform: Platform,
    pub total: usize,
    pub imported: Vec<ImportedConversation>,
    pub failures: Vec<ImportFailure>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile: Option<ReconcileReport>,

    pub index_path: PathBuf,
}

impl ImportReport {
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.failures.len()
    }
}

/// One finished batch item, as shown to the user.
#[derive(Debug, Clone, Copy)]
pub enum ImportProgress<'a> {
    Imported {
        ordinal: usize,
        total: usize,
        id: &'a str,
    },
    Failed {
        ordinal: usize,
        total: usize,
        message: &'a str,
    },
}

impl Display for ImportProgress<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Imported { ordinal, total, id } => {
                write!(f, "[{ordinal}/{total}] Imported: {id}")
            }
            Self::Failed {
                ordinal,
                total,
                message,
            } => write!(f, "[{ordinal}/{total}] Error: {message}"),
        }
    }
}

#[must_use]
pub fn index_path(base_dir: &Path) -> PathBuf {
    base_dir.join(INDEX_FILE_NAME)
}

/// Reads an export as JSON, or pulls `conversations.json` out of a zip.
pub fn load_document(path: &Path) -> Result<Value> {
    let bytes = std::fs::read(path)
        .map_err(|error| InputDocumentError::new(path, format!("failed to read file: {error}")))?;

    let json_bytes = if bytes.starts_with(ZIP_MAGIC) {
        read_export_from_zip(path, &bytes)?
    } else {
        bytes
    };

    serde_json::from_slice(&json_bytes).map_err(|error| {
        InputDocumentError::new(path, format!("not a valid JSON document: {error}")).into()
    })
}

fn read_export_from_zip(path: &Path, bytes: &[u8]) -> Result<Vec<u8>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|error| InputDocumentError::new(path, format!("unreadable zip archive: {error}")))?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|error| {
            InputDocumentError::new(path, format!("unreadable zip entry #{index}: {error}"))
        })?;
        if !entry.is_file() || !entry.name().ends_with(EXPORT_FILE_NAME) {
            continue;
        }
        debug!(entry = entry.name(), "reading export from zip");
        let mut out = Vec::new();
        entry.read_to_end(&mut out).map_err(|error| {
            InputDocumentError::new(
                path,
                format!("failed to read zip entry {}: {error}", entry.name()),
            )
        })?;
        return Ok(out);
    }

    bail!(InputDocumentError::new(
        path,
        format!("zip archive has no `{EXPORT_FILE_NAME}` entry")
    ))
}

/// Imports every conversation in `input` into the archive under `base_dir`.
///
/// Item failures are collected in the report and do not stop the batch;
/// only an unusable input document returns `Err`.
pub fn import_file(
    input: &Path,
    base_dir: &Path,
    options: ImportOptions,
    mut on_progress: impl FnMut(ImportProgress<'_>),
) -> Result<ImportReport> {
    let document = load_document(input)?;
    let conversations = adapters::conversation_list(options.platform, document)
        .map_err(|error| InputDocumentError::new(input, format!("{error:#}")))?;
    if conversations.is_empty() {
        bail!(InputDocumentError::new(input, "no conversations found"));
    }

    let index_path = index_path(base_dir);
    let connection = sqlite::open_index(&index_path)?;

    let reconcile = if options.reconcile_on_start {
        let report = reconcile::reconcile(&connection, base_dir, ReconcileOptions::default())
            .context("startup reconciliation failed")?;
        Some(report)
    } else {
        None
    };

    let total = conversations.len();
    info!(
        platform = %options.platform,
        shape = export_shape(options.platform).as_str(),
        total,
        input = %input.display(),
        "import started"
    );

    let mut report = ImportReport {
        platform: options.platform,
        total,
        imported: Vec::new(),
        failures: Vec::new(),
        reconcile,
        index_path,
    };

    for (index, conversation) in conversations.iter().enumerate() {
        let ordinal = index + 1;
        match import_conversation(&connection, base_dir, conversation, options) {
            Ok(mut imported) => {
                imported.ordinal = ordinal;
                on_progress(ImportProgress::Imported {
                    ordinal,
                    total,
                    id: &imported.id,
                });
                report.imported.push(imported);
            }
            Err(error) => {
                let message = format!("{error:#}");
                warn!(ordinal, %message, "conversation import failed");
                on_progress(ImportProgress::Failed {
                    ordinal,
                    total,
                    message: &message,
                });
                report.failures.push(ImportFailure { ordinal, message });
            }
        }
    }

    info!(
        imported = report.imported.len(),
        failed = report.failures.len(),
        "import finished"
    );
    Ok(report)
}

/// Adapter, metadata, identity, then archive and index for one conversation.
pub fn import_conversation(
    connection: &Connection,
    base_dir: &Path,
    conversation: &Value,
    options: ImportOptions,
) -> Result<ImportedConversation> {
    let parsed =
        adapters::parse_conversation(options.platform, conversation, options.branch_policy)?;
    if parsed.messages.is_empty() {
        bail!("no messages found in conversation");
    }
    for warning in &parsed.warnings {
        debug!(%warning, "adapter warning");
    }

    let derived = derive_metadata(parsed.title.as_deref(), &parsed.messages, conversation)?;
    let id = conversation_id(options.platform, &parsed.messages);

    let imported_at_ms = now_unix_ms();
    let date = calendar_date(parsed.created_at_unix_ms.unwrap_or(imported_at_ms));
    let mut record = ConversationRecord {
        id,
        platform: options.platform,
        date,
        title: derived.title,
        summary: derived.summary,
        tags: derived.tags,
        topics: derived.topics,
        token_estimate: derived.token_estimate,
        message_count: parsed.messages.len() as u64,
        source_id: parsed.source_id,
        file_path: String::new(),
        imported_at: format_unix_ms(imported_at_ms),
    };
    record.file_path = relative_full_path(record.platform, record.year_month(), &record.id);

    let previous = sqlite::get_conversation(connection, &record.id)?;

    let artifact = FullArtifact::new(record.clone(), parsed.messages, conversation.clone());
    let staged = archive::stage_artifacts(record_paths(base_dir, &record), &artifact)?;
    if let Err(error) = sqlite::upsert_conversation(connection, &record) {
        if let Err(cleanup) = staged.discard() {
            warn!(
                id = %record.id,
                error = %format!("{cleanup:#}"),
                "failed to discard staged artifacts"
            );
        }
        return Err(error);
    }
    staged.commit()?;

    if let Some(previous) = &previous
        && previous.file_path != record.file_path
    {
        remove_superseded(base_dir, previous);
    }

    debug!(id = %record.id, file_path = %record.file_path, "conversation imported");
    Ok(ImportedConversation {
        ordinal: 0,
        id: record.id,
        title: record.title,
        date: record.date,
        message_count: record.message_count,
        file_path: record.file_path,
        replaced: previous.is_some(),
        warnings: parsed.warnings,
    })
}

// A failure here leaves a stale pair that reconciliation removes later.
fn remove_superseded(base_dir: &Path, previous: &ConversationRecord) {
    let removed = paths_from_file_path(base_dir, &previous.file_path)
        .and_then(|paths| archive::remove_artifact_pair(&paths));
    match removed {
        Ok(()) => debug!(
            id = %previous.id,
            file_path = %previous.file_path,
            "removed superseded artifacts"
        ),
        Err(error) => warn!(
            id = %previous.id,
            error = %format!("{error:#}"),
            "failed to remove superseded artifacts"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::{ImportOptions, ImportProgress};
    use crate::adapters::BranchPolicy;
    use crate::models::Platform;

    #[test]
    fn progress_lines_match_cli_format() {
        let imported = ImportProgress::Imported {
            ordinal: 1,
            total: 3,
            id: "0123456789ab",
        };
        assert_eq!(imported.to_string(), "[1/3] Imported: 0123456789ab");

        let failed = ImportProgress::Failed {
            ordinal: 2,
            total: 3,
            message: "no messages found in conversation",
        };
        assert_eq!(
            failed.to_string(),
            "[2/3] Error: no messages found in conversation"
        );
    }

    #[test]
    fn options_default_to_all_children_with_reconcile() {
        let options = ImportOptions::new(Platform::Chatgpt);
        assert_eq!(options.branch_policy, BranchPolicy::AllChildren);
        assert!(options.reconcile_on_start);

        let options = options
            .with_branch_policy(BranchPolicy::ActivePath)
            .with_reconcile_on_start(false);
        assert_eq!(options.branch_policy, BranchPolicy::ActivePath);
        assert!(!options.reconcile_on_start);
    }
}
