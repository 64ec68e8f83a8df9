//! Remote store adapter.
//!
//! The remote entry API is consumed through [`RemoteEntryStore`]. Whatever
//! transport sits behind it, every failure is classified into exactly one of
//! the three [`RemoteError`] kinds; the entry manager's retry policy relies on
//! that classification.

mod http;

use std::future::Future;

use thiserror::Error;

pub use http::HttpRemoteStore;

use crate::models::{EntryId, FailureKind, JournalEntry};

/// Result type for remote calls
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Classified remote failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Session invalid or expired; never retried automatically
    #[error("remote rejected the session")]
    Unauthorized,
    /// The entry does not exist remotely
    #[error("entry not found on remote")]
    NotFound,
    /// Network failure, timeout or server-side error; retried with backoff
    #[error("transient remote failure: {0}")]
    Transient(String),
}

/// Retry policy class of a remote failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Retryable,
    ReauthRequired,
    /// Resolved by the caller depending on the operation (delete vs update)
    Contextual,
}

impl RemoteError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Unauthorized => FailureKind::Unauthorized,
            Self::NotFound => FailureKind::NotFound,
            Self::Transient(_) => FailureKind::Transient,
        }
    }

    pub const fn retry_class(&self) -> RetryClass {
        match self {
            Self::Unauthorized => RetryClass::ReauthRequired,
            Self::NotFound => RetryClass::Contextual,
            Self::Transient(_) => RetryClass::Retryable,
        }
    }
}

/// Owner-scoped CRUD access to the authoritative entry store
pub trait RemoteEntryStore: Send + Sync {
    /// Create an entry remotely and return its permanent id
    fn create(&self, entry: &JournalEntry) -> impl Future<Output = RemoteResult<EntryId>> + Send;

    /// Replace the remote copy of `id`
    fn update(
        &self,
        id: &EntryId,
        entry: &JournalEntry,
    ) -> impl Future<Output = RemoteResult<()>> + Send;

    /// Delete `id` remotely
    fn delete(&self, id: &EntryId) -> impl Future<Output = RemoteResult<()>> + Send;

    /// Entries of `owner_id` modified after `cursor` (all entries when `None`),
    /// including tombstones (`is_deleted = true`)
    fn list_since(
        &self,
        owner_id: &str,
        cursor: Option<i64>,
    ) -> impl Future<Output = RemoteResult<Vec<JournalEntry>>> + Send;
}
