use anyhow::Result;
use clap::Args;

use crate::config::RuntimePaths;
use crate::reconcile::{ReconcileOptions, reconcile};
use crate::sqlite;

#[derive(Debug, Clone, Args)]
pub struct ReconcileArgs {
    /// Delete index rows whose full artifact no longer exists.
    #[arg(long, default_value_t = false)]
    pub prune: bool,

    /// Report only; change nothing.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

pub fn run(args: &ReconcileArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let connection = sqlite::open_index(&runtime_paths.index_path())?;
    let options = ReconcileOptions {
        prune: args.prune,
        dry_run: args.dry_run,
    };
    let report = reconcile(&connection, &runtime_paths.base_dir, options)?;

    for finding in &report.findings {
        let outcome = match (&finding.error, finding.applied) {
            (Some(error), _) => format!("failed: {error}"),
            (None, true) => "repaired".to_string(),
            (None, false) => "pending".to_string(),
        };
        println!(
            "{} {} action={} {outcome}",
            finding.kind.as_str(),
            finding.path,
            finding.action.as_str()
        );
    }
    if !report.is_clean() {
        let kinds = report
            .counts_by_kind()
            .into_iter()
            .map(|(kind, count)| format!("{kind}={count}"))
            .collect::<Vec<_>>()
            .join(" ");
        println!("Findings by kind: {kinds}");
    }
    println!(
        "Reconcile complete: findings={} repaired={} failed={} dry_run={}",
        report.findings.len(),
        report.repaired(),
        report.failed(),
        report.dry_run
    );

    Ok(())
}
