//! Config command handler.

use std::path::Path;

use anyhow::Result;

use crate::config::load_engine_config;
use crate::config_commands::ConfigCommand;

/// Execute the config command.
pub fn execute(path: Option<&Path>, command: &ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => handle_show(path),
        ConfigCommand::Validate => handle_validate(path),
    }
}

fn handle_show(path: Option<&Path>) -> Result<()> {
    let config = load_engine_config(path)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn handle_validate(path: Option<&Path>) -> Result<()> {
    let Some(path) = path else {
        println!("No configuration file given; built-in defaults are valid.");
        return Ok(());
    };
    load_engine_config(Some(path))?;
    println!("✓ {} is valid.", path.display());
    Ok(())
}
