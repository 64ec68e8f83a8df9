//! In-memory key-value store

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{KeyValueStore, StoreOp};
use crate::error::{Error, Result};

/// Process-local store.
///
/// Clones share the same map, so dropping a manager and building a new one
/// over a clone behaves like a reload over the same persistent storage.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<BTreeMap<String, String>>>,
    read_only: Arc<AtomicBool>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, as a full or broken disk would
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.lock().map_or(0, |map| map.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>> {
        self.inner
            .lock()
            .map_err(|_| Error::LocalStore("memory store lock poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn write_batch(&self, ops: Vec<StoreOp>) -> Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(Error::LocalStore("storage quota exceeded".to_string()));
        }

        let mut map = self.lock()?;
        for op in ops {
            match op {
                StoreOp::Set { key, value } => {
                    map.insert(key, value);
                }
                StoreOp::Remove { key } => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }
}
