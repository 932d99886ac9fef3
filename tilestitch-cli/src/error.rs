//! CLI error types.

use std::fmt;
use std::io;

/// Errors surfaced to the terminal by CLI commands.
#[derive(Debug)]
pub enum CliError {
    /// Configuration loading, validation or resolution failed
    Config(String),
    /// Logging could not be initialized
    Logging(io::Error),
    /// An ingest run could not be started or failed outright
    Ingest(String),
    /// Cache statistics could not be gathered
    CacheStats(String),
    /// The cache could not be cleared
    CacheClear(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Logging(e) => write!(f, "Failed to initialize logging: {}", e),
            CliError::Ingest(msg) => write!(f, "Ingest failed: {}", msg),
            CliError::CacheStats(msg) => write!(f, "Failed to read cache stats: {}", msg),
            CliError::CacheClear(msg) => write!(f, "Failed to clear cache: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl From<tilestitch::config::ConfigFileError> for CliError {
    fn from(e: tilestitch::config::ConfigFileError) -> Self {
        CliError::Config(e.to_string())
    }
}
