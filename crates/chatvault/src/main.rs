#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use chatvault::cli::app::{Cli, Command, RuntimeArgs};
use chatvault::cli::commands;
use chatvault::config::RuntimePaths;
use chatvault::import::InputDocumentError;
use chatvault::models::QueryEnvelopeCommandFailure;
use clap::Parser;
use clap::error::ErrorKind;
use tracing_subscriber::EnvFilter;

const EXIT_SUCCESS: i32 = 0;
const EXIT_RUNTIME_FAILURE: i32 = 1;
const EXIT_USAGE_ERROR: i32 = 64;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => return exit_code_for_parse_error(error),
    };
    init_tracing(cli.runtime.verbose);

    let command_name = command_name(&cli.command);
    tracing::debug!(command = command_name, "starting");

    match execute(cli) {
        Ok(()) => EXIT_SUCCESS,
        Err(error) => report_failure(command_name, &error),
    }
}

fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Import(args) => {
            let runtime_paths = resolve_runtime_paths(&cli.runtime)?;
            commands::import::run(&args, &runtime_paths)
        }
        Command::Search(args) => {
            let runtime_paths = resolve_runtime_paths(&cli.runtime)?;
            commands::search::run(&args, &runtime_paths)
        }
        Command::Reconcile(args) => {
            let runtime_paths = resolve_runtime_paths(&cli.runtime)?;
            commands::reconcile::run(&args, &runtime_paths)
        }
        Command::Schema(args) => commands::schema::run(&args),
    }
}

/// Logs go to stderr so stdout stays reserved for progress and JSON.
fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "chatvault=debug"
    } else {
        "chatvault=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn report_failure(command_name: &str, error: &anyhow::Error) -> i32 {
    if let Some(failure) = error.downcast_ref::<QueryEnvelopeCommandFailure>() {
        // Machine-readable commands answer with an error envelope on stdout.
        match serde_json::to_string(failure.envelope()) {
            Ok(encoded) => println!("{encoded}"),
            Err(_) => eprintln!("chatvault: {failure}"),
        }
    } else if let Some(input_error) = error.downcast_ref::<InputDocumentError>() {
        eprintln!("chatvault: fatal input error: {input_error}");
    } else {
        eprintln!("{error:#}");
    }
    eprintln!("chatvault: failed `{command_name}` (exit_code={EXIT_RUNTIME_FAILURE})");
    EXIT_RUNTIME_FAILURE
}

fn exit_code_for_parse_error(error: clap::Error) -> i32 {
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            let _ = error.print();
            EXIT_SUCCESS
        }
        _ => {
            let _ = error.print();
            EXIT_USAGE_ERROR
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Import(_) => "import",
        Command::Search(_) => "search",
        Command::Reconcile(_) => "reconcile",
        Command::Schema(_) => "schema",
    }
}

fn resolve_runtime_paths(args: &RuntimeArgs) -> Result<RuntimePaths> {
    let home_dir = match &args.home_dir {
        Some(path) => path.clone(),
        None => std::env::var_os("HOME")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("HOME is not set; pass --home-dir"))?,
    };

    let cwd = match &args.cwd {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };

    chatvault::config::resolve_runtime_paths(&home_dir, &cwd, args.base_dir.as_deref())
}
