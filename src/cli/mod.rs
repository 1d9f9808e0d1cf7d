//! CLI interface for stop-guard
//!
//! Provides subcommands for:
//! - `run`: Monitor positions until Ctrl-C
//! - `check`: Run a single monitoring tick and print the decisions
//! - `config`: Show the effective configuration

mod check;
mod run;

pub use check::CheckArgs;
pub use run::RunArgs;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "stop-guard")]
#[command(about = "Adaptive stop-loss manager for leveraged futures positions")]
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
    /// Monitor positions against the paper exchange
    Run(RunArgs),
    /// Run one monitoring tick and print the decisions
    Check(CheckArgs),
    /// Show effective configuration as JSON
    Config,
}
