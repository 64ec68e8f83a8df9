//! Entry manager.
//!
//! The single entry point the UI talks to. Local operations write through to
//! the local store and the sync queue in one atomic batch and return
//! immediately; everything remote happens in [`EntryManager::sync`] or the
//! background loop started with [`EntryManager::run`].

mod sync;

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDate;
use tokio::sync::{watch, Notify};

pub use sync::SyncReport;

use crate::auth::{SessionProvider, StaticSession};
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::events::{EventBus, SyncEvent};
use crate::local::LocalStore;
use crate::models::{Block, EntryId, EntryKind, JournalEntry, SyncTask};
use crate::queue::SyncQueue;
use crate::remote::RemoteEntryStore;
use crate::state::{StatusCell, SyncState};
use crate::store::KeyValueStore;

/// Offline-first manager for one device's journal entries
pub struct EntryManager<S, R> {
    inner: Arc<Inner<S, R>>,
}

impl<S, R> Clone for EntryManager<S, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<S, R> {
    local: LocalStore<S>,
    /// Also serialises every local write
    queue: Mutex<SyncQueue<S>>,
    remote: R,
    session: Arc<dyn SessionProvider>,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    status: StatusCell,
    config: SyncConfig,
    syncing: AtomicBool,
    /// Owners whose session the remote rejected
    paused: Mutex<HashSet<String>>,
    work: Notify,
}

/// Builder for [`EntryManager`]
pub struct EntryManagerBuilder<S, R> {
    store: Arc<S>,
    remote: R,
    session: Option<Arc<dyn SessionProvider>>,
    clock: Option<Arc<dyn Clock>>,
    bus: Option<EventBus>,
    config: SyncConfig,
}

impl<S, R> EntryManagerBuilder<S, R>
where
    S: KeyValueStore + 'static,
    R: RemoteEntryStore + 'static,
{
    #[must_use]
    pub fn session(mut self, session: impl SessionProvider + 'static) -> Self {
        self.session = Some(Arc::new(session));
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    #[must_use]
    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    #[must_use]
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Load the persisted queue and assemble the manager
    pub fn build(self) -> Result<EntryManager<S, R>> {
        self.config.validate()?;
        let queue = SyncQueue::load(Arc::clone(&self.store), self.config.backoff)?;
        let session = self
            .session
            .unwrap_or_else(|| Arc::new(StaticSession::signed_out()));

        let status = StatusCell::default();
        if let Some(user) = session.current_user_id() {
            status.set(if queue.has_pending_for(&user) {
                SyncState::Error
            } else {
                SyncState::Synced
            });
        }

        tracing::debug!("Entry manager ready with {} queued task(s)", queue.len());
        Ok(EntryManager {
            inner: Arc::new(Inner {
                local: LocalStore::new(self.store),
                queue: Mutex::new(queue),
                remote: self.remote,
                session,
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                bus: self.bus.unwrap_or_default(),
                status,
                config: self.config,
                syncing: AtomicBool::new(false),
                paused: Mutex::new(HashSet::new()),
                work: Notify::new(),
            }),
        })
    }
}

impl<S, R> EntryManager<S, R>
where
    S: KeyValueStore + 'static,
    R: RemoteEntryStore + 'static,
{
    pub fn builder(store: Arc<S>, remote: R) -> EntryManagerBuilder<S, R> {
        EntryManagerBuilder {
            store,
            remote,
            session: None,
            clock: None,
            bus: None,
            config: SyncConfig::default(),
        }
    }

    /// Create an empty entry with a temporary id and queue its remote create
    pub fn create_entry(
        &self,
        owner_id: &str,
        date: NaiveDate,
        kind: EntryKind,
    ) -> Result<JournalEntry> {
        let owner_id = owner_id.trim();
        if owner_id.is_empty() {
            return Err(Error::InvalidInput("owner id must not be empty".into()));
        }

        let now = self.now();
        let entry = JournalEntry::new(owner_id, date, kind, now);
        {
            let mut queue = self.lock_queue()?;
            let staged = queue.stage_enqueue(SyncTask::create(entry.clone(), now))?;
            let mut ops = self.inner.local.put_ops(&entry)?;
            ops.push(staged.store_op());
            self.inner.local.commit(ops)?;
            queue.apply(staged);
        }

        tracing::debug!("Created entry {} for {}", entry.id, date);
        self.inner.work.notify_one();
        Ok(entry)
    }

    /// Replace an entry's blocks.
    ///
    /// Updating an id that is not stored locally is a logged no-op and
    /// returns `Ok(None)`.
    pub fn update_entry(&self, id: &EntryId, blocks: Vec<Block>) -> Result<Option<JournalEntry>> {
        let now = self.now();
        let entry = {
            let mut queue = self.lock_queue()?;
            let Some(mut entry) = self.inner.local.get(id)? else {
                tracing::warn!("Ignoring update for entry {} which is not stored locally", id);
                return Ok(None);
            };
            entry.blocks = blocks;
            entry.updated_at = now.max(entry.updated_at);

            let task = if entry.id.is_temporary() && queue.get(&entry.id).is_none() {
                SyncTask::create(entry.clone(), now)
            } else {
                SyncTask::update(entry.clone(), now)
            };
            let staged = queue.stage_enqueue(task)?;
            let mut ops = self.inner.local.put_ops(&entry)?;
            ops.push(staged.store_op());
            self.inner.local.commit(ops)?;
            queue.apply(staged);
            entry
        };

        tracing::debug!("Updated entry {} ({} blocks)", entry.id, entry.blocks.len());
        self.inner.work.notify_one();
        Ok(Some(entry))
    }

    /// Remove an entry locally and queue its remote delete.
    ///
    /// Entries that never reached the remote just lose their queued create.
    /// Returns `false` when there was nothing to delete.
    pub fn delete_entry(&self, id: &EntryId) -> Result<bool> {
        let now = self.now();
        {
            let mut queue = self.lock_queue()?;
            let (removed, mut ops) = self.inner.local.remove_ops(id)?;
            let payload = removed.or_else(|| queue.get(id).map(|task| task.payload.clone()));
            let Some(payload) = payload else {
                tracing::warn!("Ignoring delete for unknown entry {}", id);
                return Ok(false);
            };

            let staged = queue.stage_enqueue(SyncTask::delete(payload, now))?;
            ops.push(staged.store_op());
            self.inner.local.commit(ops)?;
            queue.apply(staged);
        }

        tracing::debug!("Deleted entry {}", id);
        if !id.is_temporary() {
            self.inner.work.notify_one();
        }
        Ok(true)
    }

    /// Local entries of an owner, newest date first, then newest created
    pub fn list_entries(&self, owner_id: &str) -> Result<Vec<JournalEntry>> {
        let mut entries = self.inner.local.list_all(owner_id)?;
        entries.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(entries)
    }

    /// Entries written for one calendar day, in the order they were created
    pub fn entries_for_date(&self, owner_id: &str, date: NaiveDate) -> Result<Vec<JournalEntry>> {
        let mut entries = Vec::new();
        for id in self.inner.local.list_for_date(owner_id, date)? {
            if let Some(entry) = self.inner.local.get(&id)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    pub fn get_entry(&self, id: &EntryId) -> Result<Option<JournalEntry>> {
        self.inner.local.get(id)
    }

    /// Record that the UI opened an entry
    pub fn mark_viewed(&self, id: &EntryId) -> Result<()> {
        let _queue = self.lock_queue()?;
        if !self.inner.local.contains(id)? {
            tracing::warn!("Ignoring view of entry {} which is not stored locally", id);
            return Ok(());
        }
        self.inner.local.mark_viewed(id, self.now())
    }

    /// The entry to auto-select on load
    pub fn most_recently_viewed(&self, owner_id: &str) -> Result<Option<JournalEntry>> {
        match self.inner.local.most_recently_viewed(owner_id)? {
            Some(id) => self.inner.local.get(&id),
            None => Ok(None),
        }
    }

    /// Snapshot of queued remote work, oldest first
    pub fn pending_tasks(&self) -> Result<Vec<SyncTask>> {
        Ok(self.lock_queue()?.pending())
    }

    pub fn status(&self) -> SyncState {
        self.inner.status.get()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncState> {
        self.inner.status.subscribe()
    }

    pub fn current_user_id(&self) -> Option<String> {
        self.inner.session.current_user_id()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// React to a sign-in, sign-out or account switch.
    ///
    /// Lifts any re-authentication pause and clears parked auth failures.
    pub fn session_changed(&self, user_id: Option<&str>) -> Result<()> {
        self.lock_paused()?.clear();
        let cleared = self.lock_queue()?.clear_auth_failures()?;
        if cleared > 0 {
            tracing::info!("Session changed; {} parked task(s) will be retried", cleared);
        }

        match user_id {
            None => self.set_status(SyncState::Offline),
            Some(_) => self.inner.work.notify_one(),
        }
        Ok(())
    }

    fn now(&self) -> i64 {
        self.inner.clock.now_millis()
    }

    fn set_status(&self, state: SyncState) {
        if self.inner.status.set(state) {
            tracing::debug!("Sync status is now {}", state);
            self.inner.bus.publish_sync(SyncEvent::StatusChanged(state));
        }
    }

    fn lock_queue(&self) -> Result<MutexGuard<'_, SyncQueue<S>>> {
        self.inner
            .queue
            .lock()
            .map_err(|_| Error::LocalStore("sync queue lock poisoned".to_string()))
    }

    fn lock_paused(&self) -> Result<MutexGuard<'_, HashSet<String>>> {
        self.inner
            .paused
            .lock()
            .map_err(|_| Error::LocalStore("sync pause lock poisoned".to_string()))
    }

    fn is_paused(&self, owner_id: &str) -> bool {
        self.lock_paused()
            .map_or(true, |paused| paused.contains(owner_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{RemoteError, RemoteResult};
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    /// Remote that is never reachable
    struct Unreachable;

    impl RemoteEntryStore for Unreachable {
        async fn create(&self, _entry: &JournalEntry) -> RemoteResult<EntryId> {
            Err(RemoteError::transient("offline"))
        }

        async fn update(&self, _id: &EntryId, _entry: &JournalEntry) -> RemoteResult<()> {
            Err(RemoteError::transient("offline"))
        }

        async fn delete(&self, _id: &EntryId) -> RemoteResult<()> {
            Err(RemoteError::transient("offline"))
        }

        async fn list_since(
            &self,
            _owner_id: &str,
            _cursor: Option<i64>,
        ) -> RemoteResult<Vec<JournalEntry>> {
            Err(RemoteError::transient("offline"))
        }
    }

    fn manager(store: &MemoryStore) -> EntryManager<MemoryStore, Unreachable> {
        EntryManager::builder(Arc::new(store.clone()), Unreachable)
            .clock(crate::clock::ManualClock::new(1_000))
            .build()
            .unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, d).unwrap()
    }

    #[test]
    fn create_entry_is_local_and_queued() {
        let store = MemoryStore::new();
        let manager = manager(&store);

        let entry = manager.create_entry("u1", day(1), EntryKind::Morning).unwrap();
        assert!(entry.id.is_temporary());
        assert!(entry.blocks.is_empty());
        assert_eq!(manager.get_entry(&entry.id).unwrap(), Some(entry.clone()));

        let tasks = manager.pending_tasks().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].entry_id, entry.id);
    }

    #[test]
    fn create_entry_rejects_blank_owner() {
        let manager = manager(&MemoryStore::new());
        assert!(matches!(
            manager.create_entry("  ", day(1), EntryKind::Freeform),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn update_of_unknown_entry_is_a_noop() {
        let store = MemoryStore::new();
        let manager = manager(&store);
        let ghost = EntryId::permanent("ghost").unwrap();

        let result = manager
            .update_entry(&ghost, vec![Block::paragraph("boo", 1)])
            .unwrap();
        assert_eq!(result, None);
        assert!(manager.pending_tasks().unwrap().is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn local_write_failure_surfaces_and_changes_nothing() {
        let store = MemoryStore::new();
        let manager = manager(&store);
        store.set_read_only(true);

        assert!(manager.create_entry("u1", day(1), EntryKind::Freeform).is_err());
        store.set_read_only(false);
        assert!(manager.list_entries("u1").unwrap().is_empty());
        assert!(manager.pending_tasks().unwrap().is_empty());
    }

    #[test]
    fn invalid_blocks_are_rejected() {
        let store = MemoryStore::new();
        let manager = manager(&store);
        let entry = manager.create_entry("u1", day(1), EntryKind::Freeform).unwrap();

        let block = Block::paragraph("dup", 1);
        let result = manager.update_entry(&entry.id, vec![block.clone(), block]);
        assert!(matches!(result, Err(Error::InvalidData(_))));
        assert!(manager.get_entry(&entry.id).unwrap().unwrap().blocks.is_empty());
    }

    #[test]
    fn list_entries_sorts_by_date_then_creation() {
        let store = MemoryStore::new();
        let clock = crate::clock::ManualClock::new(1_000);
        let manager = EntryManager::builder(Arc::new(store), Unreachable)
            .clock(clock.clone())
            .build()
            .unwrap();

        let older_day = manager.create_entry("u1", day(1), EntryKind::Freeform).unwrap();
        clock.advance(10);
        let first = manager.create_entry("u1", day(2), EntryKind::Freeform).unwrap();
        clock.advance(10);
        let second = manager.create_entry("u1", day(2), EntryKind::Evening).unwrap();
        manager.create_entry("u2", day(3), EntryKind::Freeform).unwrap();

        let ids: Vec<_> = manager
            .list_entries("u1")
            .unwrap()
            .into_iter()
            .map(|entry| entry.id)
            .collect();
        assert_eq!(ids, vec![second.id, first.id, older_day.id]);
    }

    #[test]
    fn entries_for_date_keeps_creation_order() {
        let store = MemoryStore::new();
        let manager = manager(&store);

        let first = manager.create_entry("u1", day(3), EntryKind::Morning).unwrap();
        manager.create_entry("u1", day(4), EntryKind::Evening).unwrap();
        let second = manager.create_entry("u1", day(3), EntryKind::Evening).unwrap();
        manager.create_entry("u2", day(3), EntryKind::Freeform).unwrap();

        let ids = manager
            .entries_for_date("u1", day(3))
            .unwrap()
            .into_iter()
            .map(|entry| entry.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![first.id.clone(), second.id]);

        manager.delete_entry(&first.id).unwrap();
        assert_eq!(manager.entries_for_date("u1", day(3)).unwrap().len(), 1);
    }

    #[test]
    fn most_recently_viewed_returns_entry() {
        let store = MemoryStore::new();
        let clock = crate::clock::ManualClock::new(1_000);
        let manager = EntryManager::builder(Arc::new(store), Unreachable)
            .clock(clock.clone())
            .build()
            .unwrap();

        let a = manager.create_entry("u1", day(1), EntryKind::Freeform).unwrap();
        let b = manager.create_entry("u1", day(2), EntryKind::Freeform).unwrap();
        manager.mark_viewed(&b.id).unwrap();
        clock.advance(5);
        manager.mark_viewed(&a.id).unwrap();

        assert_eq!(
            manager.most_recently_viewed("u1").unwrap().map(|entry| entry.id),
            Some(a.id)
        );
    }

    #[test]
    fn signed_out_manager_reports_offline() {
        let manager = manager(&MemoryStore::new());
        assert_eq!(manager.status(), SyncState::Offline);
    }
}
