use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chatvault::archive::{self, artifact_paths, record_paths};
use chatvault::import::{ImportOptions, ImportReport, import_file, index_path};
use chatvault::models::Platform;
use chatvault::reconcile::{FindingKind, ReconcileOptions, RepairAction, reconcile};
use chatvault::sqlite;
use rusqlite::Connection;
use serde_json::json;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after unix epoch")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{nanos}"));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

/// Imports one dated conversation and returns the base dir and its id.
fn imported_vault(prefix: &str) -> (PathBuf, String) {
    let temp = unique_temp_dir(prefix);
    let input = temp.join("export.json");
    let base_dir = temp.join("vault");
    let document = json!({
        "title": "Reconcile me",
        "created_at": "2024-05-04T12:00:00Z",
        "messages": [
            {"role": "user", "content": "Is the archive consistent?"},
            {"role": "assistant", "content": "Let us check."}
        ]
    });
    std::fs::write(&input, serde_json::to_vec(&document).expect("encode"))
        .expect("fixture should be writable");

    let report: ImportReport = import_file(
        &input,
        &base_dir,
        ImportOptions::new(Platform::Claude).with_reconcile_on_start(false),
        |_| {},
    )
    .expect("import should complete");
    let id = report.imported[0].id.clone();
    (base_dir, id)
}

fn open(base_dir: &Path) -> Connection {
    sqlite::open_index(&index_path(base_dir)).expect("index should open")
}

#[test]
fn consistent_archive_has_no_findings() {
    let (base_dir, _) = imported_vault("chatvault-reconcile-clean");
    let report = reconcile(&open(&base_dir), &base_dir, ReconcileOptions::default())
        .expect("reconcile should run");
    assert!(report.is_clean(), "unexpected findings: {:?}", report.findings);
}

#[test]
fn orphaned_artifact_is_reindexed_and_summary_regenerated() {
    let (base_dir, id) = imported_vault("chatvault-reconcile-orphan");
    let connection = open(&base_dir);
    let record = sqlite::get_conversation(&connection, &id)
        .expect("lookup")
        .expect("row should exist");
    let paths = record_paths(&base_dir, &record);

    // Crash after the files landed but with the row lost.
    sqlite::delete_conversation(&connection, &id).expect("delete should succeed");
    std::fs::remove_file(&paths.summary).expect("summary should be removable");

    let report = reconcile(&connection, &base_dir, ReconcileOptions::default())
        .expect("reconcile should run");
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].kind, FindingKind::OrphanArtifact);
    assert_eq!(report.findings[0].action, RepairAction::Reindex);
    assert!(report.findings[0].applied);

    let restored = sqlite::get_conversation(&connection, &id)
        .expect("lookup")
        .expect("row should be restored");
    assert_eq!(restored, record);
    assert!(paths.summary.is_file());
}

#[test]
fn pending_temps_are_promoted_when_indexed_and_dropped_otherwise() {
    let (base_dir, id) = imported_vault("chatvault-reconcile-temps");
    let connection = open(&base_dir);
    let record = sqlite::get_conversation(&connection, &id)
        .expect("lookup")
        .expect("row should exist");
    let paths = record_paths(&base_dir, &record);

    // Crash after the upsert but before the rename.
    std::fs::rename(&paths.full, paths.full_temp()).expect("rename should succeed");
    // Leftover from an import whose upsert never happened.
    let stray = artifact_paths(&base_dir, Platform::Claude, "2024-05", "000000000000");
    std::fs::write(stray.full_temp(), b"{}").expect("stray temp should be writable");

    let report = reconcile(&connection, &base_dir, ReconcileOptions::default())
        .expect("reconcile should run");
    let actions: Vec<(FindingKind, RepairAction, bool)> = report
        .findings
        .iter()
        .map(|finding| (finding.kind, finding.action, finding.applied))
        .collect();
    assert_eq!(
        actions,
        vec![
            (FindingKind::PendingTemp, RepairAction::Delete, true),
            (FindingKind::PendingTemp, RepairAction::Promote, true),
        ]
    );
    assert!(paths.full.is_file());
    assert!(!stray.full_temp().exists());
    assert!(archive::scan_archive(&base_dir).expect("scan").temps.is_empty());
}

#[test]
fn temps_staged_without_an_upsert_never_replace_indexed_artifacts() {
    let (base_dir, id) = imported_vault("chatvault-reconcile-unindexed-stage");
    let connection = open(&base_dir);
    let record = sqlite::get_conversation(&connection, &id)
        .expect("lookup")
        .expect("row should exist");
    let paths = record_paths(&base_dir, &record);

    // A re-import of the same id stages new files, then dies before its upsert.
    let mut restaged = archive::read_full_artifact(&paths.full).expect("artifact should read");
    restaged.record.title = "New Title".to_string();
    restaged.record.imported_at = "2030-01-01T00:00:00.000Z".to_string();
    let _ = archive::stage_artifacts(paths.clone(), &restaged).expect("staging should succeed");
    assert!(paths.full_temp().is_file());
    assert!(paths.summary_temp().is_file());

    let report = reconcile(&connection, &base_dir, ReconcileOptions::default())
        .expect("reconcile should run");
    let actions: Vec<(FindingKind, RepairAction, bool)> = report
        .findings
        .iter()
        .map(|finding| (finding.kind, finding.action, finding.applied))
        .collect();
    assert_eq!(
        actions,
        vec![
            (FindingKind::PendingTemp, RepairAction::Delete, true),
            (FindingKind::PendingTemp, RepairAction::Delete, true),
        ]
    );

    let indexed = sqlite::get_conversation(&connection, &id)
        .expect("lookup")
        .expect("row should survive");
    let archived = archive::read_full_artifact(&paths.full).expect("artifact should read");
    assert_eq!(indexed.title, "Reconcile me");
    assert_eq!(archived.record, indexed);
    let summary = std::fs::read_to_string(&paths.summary).expect("summary should exist");
    assert!(summary.starts_with("# Reconcile me\n"), "summary: {summary}");
    assert!(archive::scan_archive(&base_dir).expect("scan").temps.is_empty());
}

#[test]
fn missing_summary_is_rewritten() {
    let (base_dir, id) = imported_vault("chatvault-reconcile-summary");
    let connection = open(&base_dir);
    let record = sqlite::get_conversation(&connection, &id)
        .expect("lookup")
        .expect("row should exist");
    let paths = record_paths(&base_dir, &record);
    let original = std::fs::read_to_string(&paths.summary).expect("summary should exist");
    std::fs::remove_file(&paths.summary).expect("summary should be removable");

    let report = reconcile(&connection, &base_dir, ReconcileOptions::default())
        .expect("reconcile should run");
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].kind, FindingKind::MissingSummary);
    assert_eq!(
        std::fs::read_to_string(&paths.summary).expect("summary should be back"),
        original
    );
}

#[test]
fn dangling_rows_are_reported_and_pruned_only_on_request() {
    let (base_dir, id) = imported_vault("chatvault-reconcile-dangling");
    let connection = open(&base_dir);
    let record = sqlite::get_conversation(&connection, &id)
        .expect("lookup")
        .expect("row should exist");
    archive::remove_artifact_pair(&record_paths(&base_dir, &record))
        .expect("artifacts should be removable");

    let report = reconcile(&connection, &base_dir, ReconcileOptions::default())
        .expect("reconcile should run");
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].kind, FindingKind::DanglingRow);
    assert_eq!(report.findings[0].action, RepairAction::ReportOnly);
    assert!(!report.findings[0].applied);
    assert_eq!(sqlite::count_conversations(&connection).expect("count"), 1);

    let dry = reconcile(
        &connection,
        &base_dir,
        ReconcileOptions {
            prune: true,
            dry_run: true,
        },
    )
    .expect("dry run should run");
    assert_eq!(dry.repaired(), 0);
    assert_eq!(sqlite::count_conversations(&connection).expect("count"), 1);

    let pruned = reconcile(
        &connection,
        &base_dir,
        ReconcileOptions {
            prune: true,
            dry_run: false,
        },
    )
    .expect("prune should run");
    assert_eq!(pruned.repaired(), 1);
    assert_eq!(sqlite::count_conversations(&connection).expect("count"), 0);
}

#[test]
fn import_repairs_the_archive_before_importing() {
    let (base_dir, id) = imported_vault("chatvault-reconcile-startup");
    let connection = open(&base_dir);
    sqlite::delete_conversation(&connection, &id).expect("delete should succeed");
    drop(connection);

    let input = base_dir.parent().expect("vault has a parent").join("second.json");
    std::fs::write(
        &input,
        serde_json::to_vec(&json!({"messages": [{"role": "user", "content": "another one"}]}))
            .expect("encode"),
    )
    .expect("fixture should be writable");

    let report = import_file(&input, &base_dir, ImportOptions::new(Platform::Claude), |_| {})
        .expect("import should complete");
    let startup = report.reconcile.expect("startup reconcile should run");
    assert_eq!(startup.findings.len(), 1);
    assert_eq!(startup.findings[0].kind, FindingKind::OrphanArtifact);
    assert_eq!(sqlite::count_conversations(&open(&base_dir)).expect("count"), 2);
}
