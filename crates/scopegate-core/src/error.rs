//! Error types for `scopegate` core library.

use thiserror::Error;

/// Result type alias using `scopegate` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `scopegate` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Persisted permission storage could not be read or written
    #[error("Permission storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Service tag not present in the scope registry
    #[error("Unknown service: {0}")]
    UnknownService(String),

    /// Scope tag not present in the scope registry
    #[error("Unknown scope level: {0}")]
    UnknownScope(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
