//! Main commands enum and primary subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::config_commands::ConfigCommand;

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run a scripted conversation against simulated providers and print the
    /// engine's events
    Simulate(SimulateArgs),

    /// Inspect or check the engine configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Arguments for `parley simulate`.
#[derive(Args, Debug, Clone, Default)]
pub struct SimulateArgs {
    /// Conversation script (JSON); the built-in demo runs when omitted
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// Earlier conversation to seed the context with (JSON)
    #[arg(long)]
    pub history: Option<PathBuf>,

    /// Append every committed turn to this file as JSON lines
    #[arg(long)]
    pub transcript: Option<PathBuf>,

    /// Print events as JSON lines instead of text
    #[arg(long)]
    pub json: bool,

    /// Print the session counters when the conversation ends
    #[arg(long)]
    pub stats: bool,
}
