#![forbid(unsafe_code)]

pub mod adapters;
pub mod archive;
pub mod cli;
pub mod config;
pub mod identity;
pub mod import;
pub mod metadata;
pub mod models;
pub mod reconcile;
pub mod sqlite;
pub mod utils;

pub use cli::app::{Cli, Command};
