//! Command-line interface
//!
//! Admin surface over the context store plus a one-shot `call` that runs a
//! lifecycle operation against the configured judge.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Arbiter workflow middleware
///
/// Keeps coding tasks on a plan, code, test, complete lifecycle and
/// remembers what each session did.
#[derive(Parser, Debug)]
#[command(name = "arbiter")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Inspect tasks
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Inspect or clear session history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Delete history records older than the retention period
    Purge {
        /// Keep sweeping every `cleanup_interval_secs` until interrupted
        #[arg(long)]
        watch: bool,
    },

    /// Run one lifecycle operation
    Call {
        /// Operation name, e.g. judge-plan
        operation: String,

        /// Session the call belongs to
        #[arg(short, long, default_value = "cli")]
        session: String,

        /// Operation input as JSON
        #[arg(short, long, default_value = "{}")]
        input: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Task inspection actions
#[derive(Subcommand, Debug)]
pub enum TaskAction {
    /// Show one task
    Show {
        /// Task ID
        task_id: String,
    },

    /// Show the task most likely in progress
    Current,

    /// List recently updated tasks
    List {
        /// Number of tasks to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

/// History actions
#[derive(Subcommand, Debug)]
pub enum HistoryAction {
    /// Show recent records of a session, newest first
    Show {
        /// Session ID
        session_id: String,

        /// Number of records to show
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Print the records as the context block handed to the judge
        #[arg(long)]
        context: bool,
    },

    /// List sessions that have records
    Sessions,

    /// Delete every record of a session
    Clear {
        /// Session ID
        session_id: String,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}
