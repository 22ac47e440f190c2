//! Knowledge vault CLI
//!
//! # Usage
//!
//! ```bash
//! vault ingest --owner doc-1 --file chunks.json
//! vault query --vector 0.1,0.2,0.3 -k 5 [--owner doc-1]
//! vault release-owner doc-1
//! vault admin <stats|analyze|cleanup|emergency-cleanup|report|reclassify|compact|rebuild-index>
//! vault start [--run-now]
//! ```
//!
//! # Configuration
//!
//! Loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/knowledge-vault/config.toml)
//! 3. `--config` file
//! 4. Environment variables (VAULT_*)
//! 5. CLI flags

use anyhow::Result;
use clap::Parser;

use vault_daemon::{init_logging, load_settings, run_command, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = load_settings(
        cli.config.as_deref(),
        cli.db_path.as_deref(),
        cli.log_level.as_deref(),
    )?;
    init_logging(&settings.log_level)?;

    if let Some(output) = run_command(&settings, cli.command).await? {
        println!("{}", serde_json::to_string_pretty(&output)?);
    }
    Ok(())
}
