//! Command-line driver for the parley turn-taking engine.
//!
//! The binary is a composition root: it loads configuration, wires the
//! engine to scripted in-process providers and prints what the engine does.
//! Real capture, playback and model adapters live outside this workspace.

#![deny(unused_crate_dependencies)]

#[cfg(test)]
use tempfile as _;
#[cfg(test)]
use futures_util as _;

// Used by main.rs only
use dotenvy as _;
use tracing_subscriber as _;

pub mod commands;
pub mod config;
pub mod config_commands;
pub mod error;
pub mod handlers;
pub mod parser;
pub mod presentation;
pub mod simulation;

// Re-export primary types for convenient access
pub use commands::{Commands, SimulateArgs};
pub use config_commands::ConfigCommand;
pub use error::CliError;
pub use parser::Cli;
