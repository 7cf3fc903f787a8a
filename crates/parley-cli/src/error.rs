//! CLI-specific error types and mappings.
//!
//! Engine and configuration errors are mapped onto sysexits-style exit codes.

use parley_core::EngineError;
use thiserror::Error;

/// CLI-specific error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// The engine stopped with an error.
    #[error("{0}")]
    Engine(String),

    /// IO error (file not found, permission denied, etc.).
    #[error("IO error: {0}")]
    Io(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed script or history document.
    #[error("Invalid input: {0}")]
    Input(String),
}

impl CliError {
    /// Map error to appropriate exit code.
    ///
    /// Exit codes follow Unix conventions:
    /// - 0: Success
    /// - 1: General error
    /// - 64-78: Reserved for specific error categories (see sysexits.h)
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Engine(_) => 1,
            Self::Input(_) => 65, // EX_DATAERR
            Self::Io(_) => 74,    // EX_IOERR
            Self::Config(_) => 78, // EX_CONFIG
        }
    }
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Config(config_err) => Self::Config(config_err.to_string()),
            other => Self::Engine(other.to_string()),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
