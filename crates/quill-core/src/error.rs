//! Error types for quill-core

use thiserror::Error;

/// Result type alias using quill-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in quill-core operations.
///
/// Every variant here is a *local* failure and is surfaced synchronously to
/// the caller. Remote failures are modelled separately by
/// [`RemoteError`](crate::remote::RemoteError) and never reach the UI as an
/// `Err`.
#[derive(Error, Debug)]
pub enum Error {
    /// The persistent store rejected a read or write
    #[error("Local store error: {0}")]
    LocalStore(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A stored or received record failed validation
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
