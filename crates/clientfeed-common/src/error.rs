//! Error types for clientfeed

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for clientfeed operations
pub type Result<T> = std::result::Result<T, FeedError>;

/// Main error type for clientfeed
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to move {from} to {to}: {source}")]
    Relocation {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid file name: {0}")]
    InvalidFileName(PathBuf),

    #[error("Invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Background task failed: {0}")]
    Task(String),
}

impl FeedError {
    /// Whether a persistence round trip that failed this way may succeed if repeated
    pub fn is_transient(&self) -> bool {
        matches!(self, FeedError::Timeout(_) | FeedError::Database(_))
    }
}
