//! Pending sync task model

use serde::{Deserialize, Serialize};

use super::entry::{EntryId, JournalEntry};

/// Remote mutation a task will perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOp {
    Create,
    Update,
    Delete,
}

/// Kind of remote failure recorded against a task for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Unauthorized,
    NotFound,
    Transient,
}

/// One queued remote mutation for a single entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTask {
    /// Entry this task targets (temporary until the create is acknowledged)
    pub entry_id: EntryId,
    pub op: SyncOp,
    /// Entry snapshot taken at enqueue time
    pub payload: JournalEntry,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_attempt_at: Option<i64>,
    /// Backoff gate (Unix ms); the task is not handed out before this instant
    #[serde(default)]
    pub next_eligible_at: i64,
    /// Bumped every time a newer mutation is merged into this task
    #[serde(default)]
    pub revision: u64,
    /// When the entry first entered the queue (Unix ms); drives drain order
    #[serde(default)]
    pub enqueued_at: i64,
    #[serde(default)]
    pub last_error: Option<FailureKind>,
}

impl SyncTask {
    /// Build a fresh task for `payload`, eligible immediately.
    #[must_use]
    pub fn new(op: SyncOp, payload: JournalEntry, now: i64) -> Self {
        Self {
            entry_id: payload.id.clone(),
            op,
            payload,
            attempts: 0,
            last_attempt_at: None,
            next_eligible_at: now,
            revision: 0,
            enqueued_at: now,
            last_error: None,
        }
    }

    #[must_use]
    pub fn create(payload: JournalEntry, now: i64) -> Self {
        Self::new(SyncOp::Create, payload, now)
    }

    #[must_use]
    pub fn update(payload: JournalEntry, now: i64) -> Self {
        Self::new(SyncOp::Update, payload, now)
    }

    #[must_use]
    pub fn delete(payload: JournalEntry, now: i64) -> Self {
        Self::new(SyncOp::Delete, payload, now)
    }
}
