//! Configuration subcommands.

use clap::Subcommand;

/// Configuration commands. Both operate on the global `--config` file.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Print the effective configuration (file merged over defaults) as JSON
    Show,
    /// Check the configuration file and report the first problem found
    Validate,
}
