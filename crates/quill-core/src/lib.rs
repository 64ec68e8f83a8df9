//! quill-core - Offline-first sync layer for Quill journal entries
//!
//! Entries are written locally first and pushed to the remote store in the
//! background. The [`EntryManager`] is the entry point; it owns the
//! [`LocalStore`] view over a [`KeyValueStore`], the durable [`SyncQueue`],
//! and a [`RemoteEntryStore`].

pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod local;
pub mod manager;
pub mod models;
pub mod queue;
pub mod remote;
pub mod state;
pub mod store;
pub mod throttle;
pub mod trigger;

pub use auth::{SessionProvider, StaticSession};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BackoffPolicy, SyncConfig};
pub use db::SqliteStore;
pub use error::{Error, Result};
pub use events::{AppEvent, EventBus, SyncEvent};
pub use local::LocalStore;
pub use manager::{EntryManager, EntryManagerBuilder, SyncReport};
pub use models::{
    Block, BlockContent, BlockId, EntryId, EntryKind, JournalEntry, SyncOp, SyncTask,
};
pub use queue::SyncQueue;
pub use remote::{HttpRemoteStore, RemoteEntryStore, RemoteError, RemoteResult};
pub use state::SyncState;
pub use store::{KeyValueStore, MemoryStore, StoreOp};
pub use throttle::AutoSaveThrottle;
pub use trigger::VisibilityTrigger;
