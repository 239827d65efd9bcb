//! Error types for pagetrail-core

use thiserror::Error;

/// Main error type for the pagetrail-core library
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite store error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Key-value store rejected a read or write (quota, closed store)
    #[error("storage error: {0}")]
    Storage(String),

    /// Sink delivery error
    #[error("sink error: {0}")]
    Sink(String),

    /// Event could not be recorded as given
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// The session already reached its terminal phase
    #[error("session {0} has ended")]
    SessionEnded(String),
}

/// Result type alias for pagetrail-core
pub type Result<T> = std::result::Result<T, Error>;
