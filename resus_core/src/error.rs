//! Error types for the resus_core library.
//!
//! Clinical inputs never fail; these errors come from I/O boundaries and
//! registry load checks.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Pathway registry failed its load-time checks
    #[error("Registry validation error: {0}")]
    Registry(String),

    /// No active session, or a snapshot of the wrong kind
    #[error("Session error: {0}")]
    Session(String),

    #[error("{0}")]
    Other(String),
}
