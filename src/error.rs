//! Error types for the pattern confidence engine
//!
//! This module provides structured error definitions using thiserror. Every
//! variant describes a local, recoverable failure: the engine degrades to
//! fewer (or no) suggestions instead of surfacing errors to the host.

use crate::types::PatternId;
use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// A persisted blob could not be read or decoded
    #[error("Storage read error for '{key}': {message}")]
    StorageRead { key: String, message: String },

    /// A persisted blob could not be written
    #[error("Storage write error for '{key}': {message}")]
    StorageWrite { key: String, message: String },

    /// Observation is missing required fields
    #[error("Malformed observation: {0}")]
    MalformedObservation(String),

    /// Feedback references a pattern the store does not know
    #[error("Invalid feedback: unknown pattern {0}")]
    InvalidFeedback(PatternId),

    /// Pattern ID string is not a valid identifier
    #[error("Invalid pattern ID: {0}")]
    InvalidPatternId(String),

    /// Configuration source could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Configuration loaded but failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// SQLite backend failure
    #[error("Database error: {0}")]
    Database(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Store actor is gone (engine shut down) or did not answer
    #[error("Store actor unavailable: {0}")]
    Actor(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Soft failures are reported to the caller but leave engine state intact
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            EngineError::MalformedObservation(_)
                | EngineError::InvalidFeedback(_)
                | EngineError::InvalidPatternId(_)
        )
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Convert anyhow::Error to EngineError
impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Other(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::InvalidConfig(err.to_string())
    }
}
