//! CLI interface for mids-trigger
//!
//! Provides subcommands for:
//! - `run`: Start the feed, cache and strategy engine
//! - `config`: Print the effective configuration

mod run;

pub use run::RunArgs;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "mids-trigger")]
#[command(about = "Mid-price feed and per-account strategy trigger engine")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the engine until Ctrl-C
    Run(RunArgs),
    /// Print the effective configuration
    Config,
}
