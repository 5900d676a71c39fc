use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tidemark_core::Priority;

#[derive(Parser)]
#[command(name = "tidemark")]
#[command(about = "Log entries and keep your tracking data in sync from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local state database
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Directory holding the local event and reminder stores
    #[arg(long, global = true, value_name = "DIR")]
    pub records_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log an entry (queued for later if the server is unreachable)
    Log {
        #[command(subcommand)]
        entry: LogCommands,
        /// Replay priority if the entry ends up queued
        #[arg(long, default_value = "normal")]
        priority: Priority,
    },
    /// Inspect and manage the offline queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Refresh every sync domain, or a single one
    Sync {
        /// Ignore the debounce window
        #[arg(long)]
        force: bool,
        /// Only sync this domain (e.g. calendar, activity-feed)
        #[arg(long, value_name = "NAME")]
        domain: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage the API key stored in the OS keychain
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum LogCommands {
    /// Water intake in millilitres
    Water { ml: u32 },
    /// Free-text meal description
    Food { text: Vec<String> },
    /// Body weight in kilograms
    Weight { kg: f64 },
    /// Mood on a 1-10 scale
    Mood {
        value: u8,
        /// Energy on a 1-10 scale
        #[arg(long)]
        energy: Option<u8>,
    },
    /// Anything else
    Note { text: Vec<String> },
    /// Free-text expense, parsed server-side
    Expense { text: Vec<String> },
    /// Card or cash transaction
    Transaction {
        merchant: String,
        amount: f64,
        #[arg(long)]
        category: Option<String>,
    },
    /// Incoming payment
    Income {
        source: String,
        amount: f64,
        category: String,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Show pending and failed counts
    Status,
    /// List pending entries in replay order
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replay pending entries now
    Drain,
    /// List entries that will not be retried automatically
    Failed {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move a failed entry back into the queue
    Retry { id: String },
    /// Drop a failed or pending entry
    Discard { id: String },
    /// Drop every failed entry
    ClearFailed,
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Store the API key in the keychain
    SetKey { key: String },
    /// Show whether an API key is available
    Status,
    /// Remove the stored API key
    Clear,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
