use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::adapters::BranchPolicy;
use crate::config::RuntimePaths;
use crate::import::{ImportOptions, import_file};
use crate::models::Platform;

#[derive(Debug, Clone, Args)]
pub struct ImportArgs {
    /// `conversations.json` export or the zip it ships in.
    #[arg(value_name = "FILE")]
    pub input: PathBuf,

    #[arg(long, value_enum)]
    pub platform: Platform,

    /// Keep only the branch leading to the export's selected message.
    #[arg(long, default_value_t = false)]
    pub active_branch: bool,

    /// Skip the archive/index consistency pass before importing.
    #[arg(long, default_value_t = false)]
    pub no_reconcile: bool,
}

impl ImportArgs {
    #[must_use]
    pub fn options(&self) -> ImportOptions {
        let branch_policy = if self.active_branch {
            BranchPolicy::ActivePath
        } else {
            BranchPolicy::AllChildren
        };
        ImportOptions::new(self.platform)
            .with_branch_policy(branch_policy)
            .with_reconcile_on_start(!self.no_reconcile)
    }
}

pub fn run(args: &ImportArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let input = runtime_paths.resolve(&args.input)?;
    let report = import_file(&input, &runtime_paths.base_dir, args.options(), |progress| {
        println!("{progress}");
    })?;

    if let Some(reconcile) = report.reconcile.as_ref().filter(|report| !report.is_clean()) {
        println!(
            "Reconciled archive: findings={} repaired={} failed={}",
            reconcile.findings.len(),
            reconcile.repaired(),
            reconcile.failed()
        );
    }
    if report.error_count() > 0 {
        println!(
            "Imported {} of {} conversations ({} failed)",
            report.imported.len(),
            report.total,
            report.error_count()
        );
    }
    println!("Import complete. Database: {}", report.index_path.display());

    Ok(())
}
