//! Persistent key-value store capability.
//!
//! The local store adapter and the sync queue both persist through this
//! trait. Implementations must make [`KeyValueStore::write_batch`] atomic:
//! multi-key updates such as an id remap are either fully applied or not at
//! all.

mod memory;

pub use memory::MemoryStore;

use crate::error::Result;

/// A single write inside an atomic batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Set { key: String, value: String },
    Remove { key: String },
}

impl StoreOp {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn remove(key: impl Into<String>) -> Self {
        Self::Remove { key: key.into() }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. } | Self::Remove { key } => key,
        }
    }
}

/// Durable string key-value storage with atomic batches
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// All keys starting with `prefix`, in ascending order
    fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Apply every op or none of them
    fn write_batch(&self, ops: Vec<StoreOp>) -> Result<()>;

    /// Write a single value
    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.write_batch(vec![StoreOp::set(key, value)])
    }

    /// Delete a single value; missing keys are not an error
    fn remove(&self, key: &str) -> Result<()> {
        self.write_batch(vec![StoreOp::remove(key)])
    }
}
