//! Main CLI parser and top-level argument handling.
//!
//! This module defines the root CLI structure with global options.

use std::path::PathBuf;

use clap::Parser;

use crate::commands::Commands;

/// Command-line interface for the parley turn-taking engine.
#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Drive the parley turn-taking engine from the command line")]
#[command(version)]
pub struct Cli {
    /// Engine configuration file (JSON); built-in defaults apply when omitted
    #[arg(long, global = true, env = "PARLEY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}
