use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Rate-limited local cache of remote photo pages.
#[derive(Debug, Parser)]
#[command(name = "photocache", version, about, long_about = None)]
pub struct Cli {
    /// Settings file (default: $PHOTOCACHE_CONFIG, then ./photocache.ron).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum Command {
    /// Run the scheduler until Ctrl-C.
    Run,
    /// Run exactly one tick and print its report.
    Tick,
    /// List every entry with its state.
    Status,
    /// Show the summary and sub-items of one entry.
    Show {
        /// Key from the registry file.
        key: String,
    },
    /// Reset every failed transfer so the next drain retries it.
    Retry,
    /// Restart an entry that is in Error.
    Reset { key: String },
    /// Drop one entry and its downloaded payloads.
    Remove { key: String },
    /// Drop every entry and its downloaded payloads.
    Clear,
}
