//! `vault` command-line front end.
//!
//! - `cli`: argument parsing with clap
//! - `commands`: command implementations (one-shot commands and `start`)

pub mod cli;
pub mod commands;

pub use cli::{AdminCommands, Cli, Commands};
pub use commands::{
    handle_admin, init_logging, load_settings, owner_directory, read_chunks, run_command,
    start_scheduler,
};
