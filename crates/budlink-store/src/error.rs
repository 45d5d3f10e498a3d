//! Error types for budlink-store.

use std::path::PathBuf;

/// Result type for budlink-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in budlink-store.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A stored row does not describe a valid reconnect record.
    #[error("Invalid row in slot {slot}: {message}")]
    InvalidRow { slot: i64, message: String },

    /// A stored address or role failed to parse.
    #[error(transparent)]
    Parse(#[from] budlink_types::ParseError),
}
