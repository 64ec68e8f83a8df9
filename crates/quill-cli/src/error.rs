use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] quill_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No entry text provided")]
    EmptyContent,
    #[error("Entry ID cannot be empty")]
    EmptyEntryId,
    #[error("Entry not found for id/prefix: {0}")]
    EntryNotFound(String),
    #[error("{0}")]
    AmbiguousEntryId(String),
    #[error("No entry has been viewed yet; pass an entry ID")]
    NothingViewed,
    #[error("Editor command failed: {0}")]
    EditorFailed(String),
    #[error("No user configured. Pass --user or set QUILL_USER_ID.")]
    UserNotConfigured,
    #[error("Sync is not configured. Pass --api-url or set QUILL_API_URL.")]
    SyncNotConfigured,
    #[error("Could not resolve a data directory; pass --db-path or set QUILL_DB_PATH")]
    NoDataDir,
}
