//! Command-line arguments for the `niord` binary.
//!
//! Dispatch lives in `main.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI: global options plus one subcommand.
#[derive(Parser)]
#[command(name = "niord")]
#[command(about = "Maritime safety message tools: light characters, search index and scheduled status changes.")]
#[command(version)]
pub struct Cli {
    /// TOML configuration file. Built-in defaults are used when omitted.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse a light characteristic such as "Fl(2+1)G 5s" and print it in canonical form.
    Light {
        #[arg(value_name = "TEXT")]
        text: String,

        /// Also print an English description.
        #[arg(short, long)]
        describe: bool,
    },

    /// Bring the index up to date, then run a free-text query.
    Search {
        #[arg(value_name = "QUERY")]
        query: String,

        /// Only match documents of this language.
        #[arg(short, long)]
        lang: Option<String>,

        /// Maximum number of hits. Defaults to `index.max_hits`.
        #[arg(short = 'n', long)]
        limit: Option<u32>,
    },

    /// Index messages changed since the last run.
    Reindex {
        /// Drop the index and rebuild it from all messages.
        #[arg(long)]
        recreate: bool,
    },

    /// Run one expiry and publication pass.
    Schedule,

    /// Run the index worker and the scheduler until the process is terminated.
    Run,
}
