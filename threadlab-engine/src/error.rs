//! Error types for threadlab-engine
//!
//! Only configuration-level problems and collaborator failures are errors.
//! Row problems and resolution diagnostics are returned as data.

use thiserror::Error;

/// Engine error type
#[derive(Debug, Error)]
pub enum EngineError {
    /// Caller-fixable configuration problem; aborts before any partial work
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Turn or annotation collaborator failed
    #[error("Store error: {0}")]
    Store(#[from] threadlab_common::Error),

    /// A per-container worker task panicked or was cancelled
    #[error("Task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        EngineError::Task(err.to_string())
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
