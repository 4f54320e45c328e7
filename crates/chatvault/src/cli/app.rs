use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use super::commands::{
    import::ImportArgs, reconcile::ReconcileArgs, schema::SchemaArgs, search::SearchArgs,
};
use crate::config::BASE_DIR_ENV;

#[derive(Debug, Parser)]
#[command(
    name = "chatvault",
    version,
    about = "Import, archive and search AI chat exports"
)]
pub struct Cli {
    #[command(flatten)]
    pub runtime: RuntimeArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct RuntimeArgs {
    /// Archive root holding `index.db` and the platform folders.
    #[arg(long, global = true, value_name = "DIR", env = BASE_DIR_ENV)]
    pub base_dir: Option<PathBuf>,

    /// Debug-level logging on stderr.
    #[arg(long, short = 'v', global = true, default_value_t = false)]
    pub verbose: bool,

    #[arg(long, global = true, value_name = "PATH")]
    pub home_dir: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Import an export file (JSON or zip) into the archive.
    Import(ImportArgs),
    /// Query the index; prints a JSON envelope.
    Search(SearchArgs),
    /// Check the archive against the index and repair drift.
    Reconcile(ReconcileArgs),
    /// Print the JSON Schema of the full conversation artifact.
    Schema(SchemaArgs),
}
