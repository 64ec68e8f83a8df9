//! Local store adapter.
//!
//! Keeps journal entries and their indices in a [`KeyValueStore`]:
//!
//! - `entry:{id}`: the entry as JSON
//! - `date:{owner}:{yyyy-mm-dd}`: ids for that day, in insertion order
//! - `viewed:{id}`: last-viewed timestamp (Unix ms)
//! - `cursor:{owner}`: remote pull cursor
//!
//! Every multi-key change goes through one atomic batch. Read-modify-write
//! sequences (index updates) assume a single writer; the entry manager
//! serialises all local writes.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::error::{Error, Result};
use crate::models::{EntryId, JournalEntry};
use crate::store::{KeyValueStore, StoreOp};

const ENTRY_PREFIX: &str = "entry:";
const DATE_PREFIX: &str = "date:";
const VIEWED_PREFIX: &str = "viewed:";
const CURSOR_PREFIX: &str = "cursor:";

fn entry_key(id: &EntryId) -> String {
    format!("{ENTRY_PREFIX}{id}")
}

fn date_key(owner_id: &str, date: NaiveDate) -> String {
    format!("{DATE_PREFIX}{owner_id}:{date}")
}

fn viewed_key(id: &EntryId) -> String {
    format!("{VIEWED_PREFIX}{id}")
}

fn cursor_key(owner_id: &str) -> String {
    format!("{CURSOR_PREFIX}{owner_id}")
}

/// Entry persistence over a key-value store
pub struct LocalStore<S> {
    store: Arc<S>,
}

impl<S> Clone for LocalStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: KeyValueStore> LocalStore<S> {
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Fetch an entry by id
    pub fn get(&self, id: &EntryId) -> Result<Option<JournalEntry>> {
        let Some(raw) = self.store.get(&entry_key(id))? else {
            return Ok(None);
        };
        Self::decode(&raw).map(Some)
    }

    /// Whether an entry exists locally
    pub fn contains(&self, id: &EntryId) -> Result<bool> {
        Ok(self.store.get(&entry_key(id))?.is_some())
    }

    /// Upsert an entry and its date index
    pub fn put(&self, entry: &JournalEntry) -> Result<()> {
        let ops = self.put_ops(entry)?;
        self.commit(ops)
    }

    /// Ops that upsert `entry`, without applying them
    pub fn put_ops(&self, entry: &JournalEntry) -> Result<Vec<StoreOp>> {
        entry.validate()?;
        if entry.is_deleted {
            return Err(Error::InvalidData(format!(
                "refusing to store tombstone for {}",
                entry.id
            )));
        }

        let mut ops = Vec::with_capacity(3);
        let existing = self.get_lenient(&entry.id)?;

        if let Some(previous) = existing.as_ref() {
            if previous.date != entry.date || previous.owner_id != entry.owner_id {
                let key = date_key(&previous.owner_id, previous.date);
                let mut ids = self.read_index(&key)?;
                ids.retain(|id| id != &entry.id);
                ops.push(Self::index_op(key, &ids)?);
            }
        }

        let key = date_key(&entry.owner_id, entry.date);
        let mut ids = self.read_index(&key)?;
        if !ids.contains(&entry.id) {
            ids.push(entry.id.clone());
            ops.push(Self::index_op(key, &ids)?);
        }

        ops.push(StoreOp::set(entry_key(&entry.id), serde_json::to_string(entry)?));
        Ok(ops)
    }

    /// Remove an entry and every index reference to it.
    ///
    /// Returns the removed entry, if there was one.
    pub fn remove(&self, id: &EntryId) -> Result<Option<JournalEntry>> {
        let (removed, ops) = self.remove_ops(id)?;
        self.commit(ops)?;
        Ok(removed)
    }

    /// Ops that remove `id`, plus the entry they remove
    pub fn remove_ops(&self, id: &EntryId) -> Result<(Option<JournalEntry>, Vec<StoreOp>)> {
        let existing = self.get_lenient(id)?;
        let mut ops = vec![StoreOp::remove(entry_key(id)), StoreOp::remove(viewed_key(id))];

        if let Some(entry) = existing.as_ref() {
            let key = date_key(&entry.owner_id, entry.date);
            let mut ids = self.read_index(&key)?;
            ids.retain(|candidate| candidate != id);
            ops.push(Self::index_op(key, &ids)?);
        }

        Ok((existing, ops))
    }

    /// All valid entries belonging to `owner_id`, in no particular order.
    ///
    /// Records that fail to decode or validate are skipped and logged.
    pub fn list_all(&self, owner_id: &str) -> Result<Vec<JournalEntry>> {
        let mut entries = Vec::new();
        for key in self.store.keys(ENTRY_PREFIX)? {
            let Some(raw) = self.store.get(&key)? else {
                continue;
            };
            match Self::decode(&raw) {
                Ok(entry) if entry.owner_id == owner_id => entries.push(entry),
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!("Skipping unreadable local record {}: {}", key, error);
                }
            }
        }
        Ok(entries)
    }

    /// Ids recorded for a calendar day, in insertion order
    pub fn list_for_date(&self, owner_id: &str, date: NaiveDate) -> Result<Vec<EntryId>> {
        self.read_index(&date_key(owner_id, date))
    }

    /// Repoint an entry from `old` to `new` together with `extra` ops.
    ///
    /// The entry record, its date-index slot and its access time move in the
    /// same atomic batch as `extra` (callers pass the sync queue's persisted
    /// state), so a failure leaves everything pointing at `old`. Returns the
    /// remapped entry, or `None` when `old` no longer exists locally; `extra`
    /// is applied either way.
    pub fn remap_id(
        &self,
        old: &EntryId,
        new: &EntryId,
        extra: Vec<StoreOp>,
    ) -> Result<Option<JournalEntry>> {
        let Some(mut entry) = self.get_lenient(old)? else {
            self.commit(extra)?;
            return Ok(None);
        };

        let mut ops = Vec::with_capacity(extra.len() + 5);

        let key = date_key(&entry.owner_id, entry.date);
        let mut ids = self.read_index(&key)?;
        let mut replaced = false;
        ids = ids
            .into_iter()
            .filter_map(|id| {
                if &id == old || &id == new {
                    if replaced {
                        return None;
                    }
                    replaced = true;
                    return Some(new.clone());
                }
                Some(id)
            })
            .collect();
        if !replaced {
            ids.push(new.clone());
        }
        ops.push(Self::index_op(key, &ids)?);

        if let Some(viewed) = self.store.get(&viewed_key(old))? {
            ops.push(StoreOp::set(viewed_key(new), viewed));
        }
        ops.push(StoreOp::remove(viewed_key(old)));

        entry.id = new.clone();
        ops.push(StoreOp::remove(entry_key(old)));
        ops.push(StoreOp::set(entry_key(new), serde_json::to_string(&entry)?));
        ops.extend(extra);

        self.commit(ops)?;
        Ok(Some(entry))
    }

    /// Record that an entry was just viewed
    pub fn mark_viewed(&self, id: &EntryId, at: i64) -> Result<()> {
        self.store.set(&viewed_key(id), &at.to_string())
    }

    /// Last-viewed timestamp of an entry
    pub fn last_viewed(&self, id: &EntryId) -> Result<Option<i64>> {
        Ok(self
            .store
            .get(&viewed_key(id))?
            .and_then(|raw| raw.trim().parse().ok()))
    }

    /// The owner's entry with the most recent access time, if any was viewed
    pub fn most_recently_viewed(&self, owner_id: &str) -> Result<Option<EntryId>> {
        let mut best: Option<(i64, EntryId)> = None;
        for entry in self.list_all(owner_id)? {
            if let Some(at) = self.last_viewed(&entry.id)? {
                if best.as_ref().map_or(true, |(best_at, _)| at > *best_at) {
                    best = Some((at, entry.id));
                }
            }
        }
        Ok(best.map(|(_, id)| id))
    }

    /// Remote pull cursor for an owner
    pub fn cursor(&self, owner_id: &str) -> Result<Option<i64>> {
        Ok(self
            .store
            .get(&cursor_key(owner_id))?
            .and_then(|raw| raw.trim().parse().ok()))
    }

    /// Op persisting a new pull cursor
    pub fn cursor_op(owner_id: &str, cursor: i64) -> StoreOp {
        StoreOp::set(cursor_key(owner_id), cursor.to_string())
    }

    /// Apply ops atomically
    pub fn commit(&self, ops: Vec<StoreOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        self.store.write_batch(ops)
    }

    fn decode(raw: &str) -> Result<JournalEntry> {
        let entry: JournalEntry = serde_json::from_str(raw)?;
        entry.validate()?;
        Ok(entry)
    }

    /// Like `get`, but treats an unreadable record as absent
    fn get_lenient(&self, id: &EntryId) -> Result<Option<JournalEntry>> {
        match self.get(id) {
            Ok(entry) => Ok(entry),
            Err(Error::Serialization(_) | Error::InvalidData(_)) => {
                tracing::warn!("Local record for {} is unreadable; treating as absent", id);
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    fn read_index(&self, key: &str) -> Result<Vec<EntryId>> {
        let Some(raw) = self.store.get(key)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(ids) => Ok(ids),
            Err(error) => {
                tracing::warn!("Discarding unreadable index {}: {}", key, error);
                Ok(Vec::new())
            }
        }
    }

    fn index_op(key: String, ids: &[EntryId]) -> Result<StoreOp> {
        if ids.is_empty() {
            Ok(StoreOp::remove(key))
        } else {
            Ok(StoreOp::set(key, serde_json::to_string(ids)?))
        }
    }
}
