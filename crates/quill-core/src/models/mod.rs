//! Data models for Quill

mod block;
mod entry;
mod task;

pub use block::{Block, BlockContent, BlockId};
pub use entry::{EntryId, EntryKind, JournalEntry, TEMPORARY_ID_PREFIX};
pub use task::{FailureKind, SyncOp, SyncTask};
