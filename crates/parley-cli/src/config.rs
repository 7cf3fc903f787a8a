//! Loading JSON inputs from disk.
//!
//! Missing fields fall back to defaults (every config type is
//! `#[serde(default)]`); the merged result is validated before use.

use std::fs;
use std::path::Path;

use parley_core::{ContextSeed, EngineConfig, validate_config};
use serde::de::DeserializeOwned;

use crate::error::CliError;

/// Load and validate the engine configuration, or the defaults when no file
/// was given.
pub fn load_engine_config(path: Option<&Path>) -> Result<EngineConfig, CliError> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let config: EngineConfig = read_json(path).map_err(|e| match e {
        CliError::Input(msg) => CliError::Config(msg),
        other => other,
    })?;
    validate_config(&config)
        .map_err(|e| CliError::Config(format!("{}: {e}", path.display())))?;
    Ok(config)
}

/// Load the conversation seed (system context and earlier turns).
pub fn load_seed(path: Option<&Path>) -> Result<ContextSeed, CliError> {
    path.map_or_else(|| Ok(ContextSeed::default()), read_json)
}

/// Read and parse one JSON document.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| CliError::Io(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&raw).map_err(|e| CliError::Input(format!("{}: {e}", path.display())))
}
