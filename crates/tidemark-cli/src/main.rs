//! Tidemark CLI - Command-line interface for logging and syncing tracking data
//!
//! Entries are submitted live and fall back to the offline queue when the
//! server is unreachable.

mod auth;
mod cli;
mod commands;
mod error;
mod record_store;

use std::env;
use std::path::PathBuf;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::auth_cmd::run_auth;
use crate::commands::completions::run_completions;
use crate::commands::log::run_log;
use crate::commands::queue::run_queue;
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "tidemark=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let records_dir = resolve_records_dir(cli.records_dir);

    match cli.command {
        Commands::Log { entry, priority } => run_log(entry, priority, &db_path).await?,
        Commands::Queue { command } => run_queue(command, &db_path).await?,
        Commands::Sync {
            force,
            domain,
            json,
        } => run_sync(force, domain.as_deref(), json, &db_path, &records_dir).await?,
        Commands::Auth { command } => run_auth(command)?,
        Commands::Completions { shell, output } => run_completions(shell, output.as_deref())?,
    }

    Ok(())
}

fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("TIDEMARK_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(|| data_dir().join("tidemark.db"))
}

fn resolve_records_dir(cli_records_dir: Option<PathBuf>) -> PathBuf {
    cli_records_dir
        .or_else(|| env::var_os("TIDEMARK_RECORDS_DIR").map(PathBuf::from))
        .unwrap_or_else(|| data_dir().join("records"))
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tidemark")
}
