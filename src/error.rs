//! Error types for credential discovery and signing.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SignitError>;

#[derive(Debug, Error)]
pub enum SignitError {
    #[error("Certificate store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("{tool} did not finish within {seconds}s")]
    ExternalToolTimeout { tool: String, seconds: u64 },

    #[error("External tool failed: {0}")]
    ExternalToolError(String),

    #[error("Failed to launch signing tool: {0}")]
    SignProcessLaunch(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parsing error: {0}")]
    Toml(#[from] toml::de::Error),
}
