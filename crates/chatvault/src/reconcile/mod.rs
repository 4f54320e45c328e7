//! Archive/index consistency checks.
//!
//! Imports write artifacts as temps, upsert the index row, then rename. A
//! crash anywhere in that window leaves one of the states detected here.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::archive::{
    self, ArtifactPaths, final_path_for_temp, id_from_full_path, paths_from_file_path,
};
use crate::models::ConversationRecord;
use crate::sqlite;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileOptions {
    /// Delete index rows whose full artifact is gone.
    pub prune: bool,
    /// Report findings without touching the archive or the index.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    PendingTemp,
    OrphanArtifact,
    MissingSummary,
    DanglingRow,
}

impl FindingKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingTemp => "pending_temp",
            Self::OrphanArtifact => "orphan_artifact",
            Self::MissingSummary => "missing_summary",
            Self::DanglingRow => "dangling_row",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairAction {
    Promote,
    Delete,
    Reindex,
    RemoveStale,
    RewriteSummary,
    Prune,
    ReportOnly,
}

impl RepairAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Promote => "promote",
            Self::Delete => "delete",
            Self::Reindex => "reindex",
            Self::RemoveStale => "remove_stale",
            Self::RewriteSummary => "rewrite_summary",
            Self::Prune => "prune",
            Self::ReportOnly => "report_only",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileFinding {
    pub kind: FindingKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub path: String,
    pub action: RepairAction,
    pub applied: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub findings: Vec<ReconcileFinding>,
    pub dry_run: bool,
}

impl ReconcileReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    #[must_use]
    pub fn repaired(&self) -> usize {
        self.findings.iter().filter(|finding| finding.applied).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.findings
            .iter()
            .filter(|finding| finding.error.is_some())
            .count()
    }

    #[must_use]
    pub fn counts_by_kind(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for finding in &self.findings {
            *counts.entry(finding.kind.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

pub fn reconcile(
    connection: &Connection,
    base_dir: &Path,
    options: ReconcileOptions,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport {
        dry_run: options.dry_run,
        ..ReconcileReport::default()
    };

    let rows = indexed_rows(connection, base_dir)?;
    let scan = archive::scan_archive(base_dir)?;
    let indexed = indexed_staging(&scan.temps, &rows);
    for temp in &scan.temps {
        if let Some(finding) = check_pending_temp(temp, &rows, &indexed, options) {
            report.findings.push(finding);
        }
    }

    // Promotions above may have completed pairs; look again before judging.
    let scan = if options.dry_run {
        scan
    } else {
        archive::scan_archive(base_dir)?
    };
    for full in &scan.full_artifacts {
        if let Some(finding) = check_full_artifact(connection, base_dir, full, &rows, options) {
            report.findings.push(finding);
        }
    }

    for (paths, record) in rows.values() {
        if paths.full.exists() {
            continue;
        }
        // A re-index above may have pointed the row at a surviving artifact.
        let current = sqlite::get_conversation(connection, &record.id)?;
        if current.is_none_or(|current| current.file_path != record.file_path) {
            continue;
        }
        report
            .findings
            .push(check_dangling_row(connection, paths, record, options));
    }

    for finding in &report.findings {
        match &finding.error {
            Some(error) => warn!(
                kind = finding.kind.as_str(),
                path = %finding.path,
                %error,
                "reconcile repair failed"
            ),
            None => info!(
                kind = finding.kind.as_str(),
                path = %finding.path,
                applied = finding.applied,
                "reconcile finding"
            ),
        }
    }

    Ok(report)
}

/// Index rows keyed by their resolved full-artifact path.
fn indexed_rows(
    connection: &Connection,
    base_dir: &Path,
) -> Result<BTreeMap<PathBuf, (ArtifactPaths, ConversationRecord)>> {
    let mut rows = BTreeMap::new();
    for record in sqlite::list_conversations(connection)? {
        match paths_from_file_path(base_dir, &record.file_path) {
            Ok(paths) => {
                rows.insert(paths.full.clone(), (paths, record));
            }
            Err(error) => warn!(id = %record.id, %error, "skipping index row with bad file_path"),
        }
    }
    Ok(rows)
}

/// Final full paths whose staged `.tmp` embeds exactly the indexed record.
///
/// Computed before any temp is moved; summary temps follow their full temp.
fn indexed_staging(
    temps: &[PathBuf],
    rows: &BTreeMap<PathBuf, (ArtifactPaths, ConversationRecord)>,
) -> BTreeSet<PathBuf> {
    temps
        .iter()
        .filter_map(|temp| {
            let target = final_path_for_temp(temp)?;
            let (_, record) = rows.get(&target)?;
            match archive::read_full_artifact(temp) {
                Ok(artifact) if artifact.record == *record => Some(target),
                Ok(_) => None,
                Err(error) => {
                    warn!(
                        path = %temp.display(),
                        error = %format!("{error:#}"),
                        "unreadable staged artifact"
                    );
                    None
                }
            }
        })
        .collect()
}

fn check_pending_temp(
    temp: &Path,
    rows: &BTreeMap<PathBuf, (ArtifactPaths, ConversationRecord)>,
    indexed: &BTreeSet<PathBuf>,
    options: ReconcileOptions,
) -> Option<ReconcileFinding> {
    let target = final_path_for_temp(temp)?;
    let full_target = full_path_for(&target)?;
    let owner = indexed
        .contains(&full_target)
        .then(|| rows.get(&full_target))
        .flatten();

    let (action, id) = match owner {
        Some((_, record)) => (RepairAction::Promote, Some(record.id.clone())),
        None => (RepairAction::Delete, None),
    };
    let mut finding = finding(FindingKind::PendingTemp, id, temp, action);
    apply(&mut finding, options, || match action {
        RepairAction::Promote => archive::promote(temp, &target),
        _ => archive::remove_if_exists(temp),
    });
    Some(finding)
}

fn check_full_artifact(
    connection: &Connection,
    base_dir: &Path,
    full: &Path,
    rows: &BTreeMap<PathBuf, (ArtifactPaths, ConversationRecord)>,
    options: ReconcileOptions,
) -> Option<ReconcileFinding> {
    let id = id_from_full_path(full)?.to_string();

    if let Some((paths, record)) = rows.get(full) {
        if paths.summary.exists() {
            return None;
        }
        let mut finding = finding(
            FindingKind::MissingSummary,
            Some(id),
            &paths.summary,
            RepairAction::RewriteSummary,
        );
        apply(&mut finding, options, || {
            archive::write_summary_artifact(&paths.summary, record)
        });
        return Some(finding);
    }

    // The id is indexed, but at another location that still exists: this
    // pair was left behind by a re-import that moved partitions.
    let superseded = rows
        .values()
        .any(|(paths, record)| record.id == id && paths.full.exists());
    let action = if superseded {
        RepairAction::RemoveStale
    } else {
        RepairAction::Reindex
    };

    let mut finding = finding(FindingKind::OrphanArtifact, Some(id.clone()), full, action);
    apply(&mut finding, options, || match action {
        RepairAction::RemoveStale => {
            let paths = sibling_paths(full, &id);
            archive::remove_artifact_pair(&paths)
        }
        _ => reindex_artifact(connection, base_dir, full, &id),
    });
    Some(finding)
}

fn check_dangling_row(
    connection: &Connection,
    paths: &ArtifactPaths,
    record: &ConversationRecord,
    options: ReconcileOptions,
) -> ReconcileFinding {
    let action = if options.prune {
        RepairAction::Prune
    } else {
        RepairAction::ReportOnly
    };
    let mut finding = finding(
        FindingKind::DanglingRow,
        Some(record.id.clone()),
        &paths.full,
        action,
    );
    if options.prune {
        apply(&mut finding, options, || {
            sqlite::delete_conversation(connection, &record.id).map(|_| ())
        });
    }
    finding
}

fn reindex_artifact(connection: &Connection, base_dir: &Path, full: &Path, id: &str) -> Result<()> {
    let artifact = archive::read_full_artifact(full)?;
    if artifact.record.id != id {
        bail!(
            "artifact {} embeds id {} instead of {id}",
            full.display(),
            artifact.record.id
        );
    }

    let mut record = artifact.record;
    record.file_path = relative_to_base(base_dir, full)
        .with_context(|| format!("artifact outside archive root: {}", full.display()))?;
    sqlite::upsert_conversation(connection, &record)?;

    let paths = sibling_paths(full, id);
    if !paths.summary.exists() {
        archive::write_summary_artifact(&paths.summary, &record)?;
    }
    Ok(())
}

/// The full artifact a final summary or full path belongs to.
fn full_path_for(target: &Path) -> Option<PathBuf> {
    let name = target.file_name()?.to_str()?;
    if name.ends_with(archive::FULL_SUFFIX) {
        return Some(target.to_path_buf());
    }
    let id = name.strip_suffix(archive::SUMMARY_SUFFIX)?;
    Some(target.with_file_name(format!("{id}{}", archive::FULL_SUFFIX)))
}

fn sibling_paths(full: &Path, id: &str) -> ArtifactPaths {
    let directory = full.parent().map(Path::to_path_buf).unwrap_or_default();
    ArtifactPaths {
        summary: directory.join(format!("{id}{}", archive::SUMMARY_SUFFIX)),
        full: full.to_path_buf(),
        directory,
    }
}

fn relative_to_base(base_dir: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base_dir).ok()?;
    let segments = relative
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(segments.join("/"))
}

fn finding(
    kind: FindingKind,
    id: Option<String>,
    path: &Path,
    action: RepairAction,
) -> ReconcileFinding {
    ReconcileFinding {
        kind,
        id,
        path: path.display().to_string(),
        action,
        applied: false,
        error: None,
    }
}

fn apply(
    finding: &mut ReconcileFinding,
    options: ReconcileOptions,
    repair: impl FnOnce() -> Result<()>,
) {
    if options.dry_run || finding.action == RepairAction::ReportOnly {
        return;
    }
    match repair() {
        Ok(()) => finding.applied = true,
        Err(error) => finding.error = Some(format!("{error:#}")),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{
        FindingKind, ReconcileFinding, ReconcileReport, RepairAction, full_path_for,
        relative_to_base,
    };

    #[test]
    fn summary_paths_map_to_their_full_artifact() {
        assert_eq!(
            full_path_for(Path::new("/base/claude/2024-01/abc_summary.md")).as_deref(),
            Some(Path::new("/base/claude/2024-01/abc_full.json"))
        );
        assert_eq!(
            full_path_for(Path::new("/base/claude/2024-01/abc_full.json")).as_deref(),
            Some(Path::new("/base/claude/2024-01/abc_full.json"))
        );
        assert_eq!(full_path_for(Path::new("/base/notes.txt")), None);
    }

    #[test]
    fn relative_paths_use_forward_slashes() {
        assert_eq!(
            relative_to_base(
                Path::new("/base"),
                Path::new("/base/claude/2024-01/abc_full.json")
            )
            .as_deref(),
            Some("claude/2024-01/abc_full.json")
        );
        assert_eq!(
            relative_to_base(Path::new("/base"), Path::new("/elsewhere/x")),
            None
        );
    }

    #[test]
    fn report_counts_kinds_and_outcomes() {
        let report = ReconcileReport {
            findings: vec![
                ReconcileFinding {
                    kind: FindingKind::PendingTemp,
                    id: None,
                    path: "a".to_string(),
                    action: RepairAction::Delete,
                    applied: true,
                    error: None,
                },
                ReconcileFinding {
                    kind: FindingKind::DanglingRow,
                    id: Some("x".to_string()),
                    path: "b".to_string(),
                    action: RepairAction::ReportOnly,
                    applied: false,
                    error: None,
                },
            ],
            dry_run: false,
        };
        assert!(!report.is_clean());
        assert_eq!(report.repaired(), 1);
        assert_eq!(report.failed(), 0);
        assert_eq!(report.counts_by_kind().get("dangling_row"), Some(&1));
    }
}
