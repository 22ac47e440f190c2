//! CLI argument parsing for the `vault` binary.
//!
//! CLI flags override every other configuration source.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Knowledge vault
///
/// Deduplicating, compressing, tiered storage for embedding vectors.
#[derive(Parser, Debug)]
#[command(name = "vault")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides ~/.config/knowledge-vault/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override database path
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the maintenance scheduler in the foreground
    Start {
        /// Run one tick of every job before waiting for the schedule
        #[arg(long)]
        run_now: bool,
    },

    /// Ingest a JSON array of chunks for one owner
    Ingest {
        /// Owning document id
        #[arg(short, long)]
        owner: String,

        /// Chunk file, `-` for stdin
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Similarity query
    Query {
        /// Comma-separated query vector
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
        vector: Vec<f32>,

        #[arg(short = 'k', long, default_value = "10")]
        top_k: usize,

        /// Restrict results to these owners (repeatable)
        #[arg(long = "owner")]
        owners: Vec<String>,
    },

    /// Drop every reference an owner holds
    ReleaseOwner {
        owner: String,
    },

    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum AdminCommands {
    /// Store, index and engine counters
    Stats,

    /// Preview what a cleanup sweep would remove
    Analyze,

    /// Run a cleanup sweep
    Cleanup {
        /// Report counts without deleting
        #[arg(long)]
        dry_run: bool,

        #[arg(long)]
        max_age_processing_days: Option<u32>,

        #[arg(long)]
        max_age_analytics_days: Option<u32>,

        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Destructive sweep with tight retention windows
    EmergencyCleanup,

    /// Four-pillar optimization report
    Report {
        /// full, compression, deduplication, tiering or analytics
        #[arg(short = 't', long = "type", default_value = "full")]
        report_type: String,
    },

    /// Reclassify tiers now
    Reclassify,

    /// Trigger RocksDB compaction
    Compact,

    /// Rebuild the similarity index from stored entries
    RebuildIndex,
}
