//! Engine-specific error types

use thiserror::Error;

/// Errors that can occur in grid engine operations
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Order submission failed after {attempts} attempts: {reason}")]
    SubmissionFailed { attempts: u32, reason: String },

    #[error("Accounting violation: {0}")]
    Accounting(String),

    #[error("State persistence error: {0}")]
    StatePersistence(String),

    #[error("Channel send error: {0}")]
    ChannelSend(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::JsonParse(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::StatePersistence(err.to_string())
    }
}

/// Result type for engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;
