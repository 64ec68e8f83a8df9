//! Journal entry model

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::block::{validate_blocks, Block};
use crate::error::{Error, Result};

/// Prefix carried by every locally generated id.
pub const TEMPORARY_ID_PREFIX: &str = "tmp-";

/// Identifier of a journal entry.
///
/// Entries start life with a *temporary* id (`tmp-` followed by a UUID v7,
/// unique per device) and are repointed to the *permanent* id handed out by
/// the remote store once the create is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    /// Generate a fresh temporary id
    #[must_use]
    pub fn temporary() -> Self {
        Self(format!("{TEMPORARY_ID_PREFIX}{}", Uuid::now_v7()))
    }

    /// Wrap an id assigned by the remote store
    pub fn permanent(id: impl Into<String>) -> Result<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(Error::InvalidInput("entry id must not be empty".into()));
        }
        if id.starts_with(TEMPORARY_ID_PREFIX) {
            return Err(Error::InvalidInput(format!(
                "remote id '{id}' collides with the temporary id space"
            )));
        }
        Ok(Self(id))
    }

    /// Whether this id has never been acknowledged by the remote store
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMPORARY_ID_PREFIX)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntryId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidInput("entry id must not be empty".into()));
        }
        Ok(Self(s.to_string()))
    }
}

/// Flavour of journal entry picked when it is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Free writing
    #[default]
    Freeform,
    /// Morning intentions
    Morning,
    /// Evening review
    Evening,
    /// Reflection on a quote or idea
    Reflection,
}

impl FromStr for EntryKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "freeform" => Ok(Self::Freeform),
            "morning" => Ok(Self::Morning),
            "evening" => Ok(Self::Evening),
            "reflection" => Ok(Self::Reflection),
            other => Err(Error::InvalidInput(format!("unknown entry kind '{other}'"))),
        }
    }
}

/// A journal entry owned by a single user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Current identifier (temporary until acknowledged)
    pub id: EntryId,
    /// Owning user
    pub owner_id: String,
    /// Logical calendar day this entry belongs to
    pub date: NaiveDate,
    #[serde(default)]
    pub kind: EntryKind,
    /// Ordered content blocks
    #[serde(default)]
    pub blocks: Vec<Block>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms), authority for last-write-wins
    pub updated_at: i64,
    /// Remote tombstone marker; local records never carry `true`
    #[serde(default)]
    pub is_deleted: bool,
}

impl JournalEntry {
    /// Create an empty entry with a fresh temporary id
    #[must_use]
    pub fn new(owner_id: impl Into<String>, date: NaiveDate, kind: EntryKind, now: i64) -> Self {
        Self {
            id: EntryId::temporary(),
            owner_id: owner_id.into(),
            date,
            kind,
            blocks: Vec::new(),
            created_at: now,
            updated_at: now,
            is_deleted: false,
        }
    }

    /// Plain-text rendering of the first non-empty block, truncated to `max_len` characters
    #[must_use]
    pub fn preview(&self, max_len: usize) -> String {
        self.blocks
            .iter()
            .map(Block::text)
            .find(|text| !text.trim().is_empty())
            .unwrap_or("")
            .lines()
            .next()
            .unwrap_or("")
            .chars()
            .take(max_len)
            .collect()
    }

    /// Check the structural invariants a record must satisfy before it is
    /// stored or queued.
    pub fn validate(&self) -> Result<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(Error::InvalidData("entry id is empty".into()));
        }
        if self.owner_id.trim().is_empty() {
            return Err(Error::InvalidData(format!("entry {} has no owner", self.id)));
        }
        if self.updated_at < self.created_at {
            return Err(Error::InvalidData(format!(
                "entry {} was updated before it was created",
                self.id
            )));
        }
        validate_blocks(&self.blocks)
            .map_err(|reason| Error::InvalidData(format!("entry {}: {reason}", self.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BlockContent;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 14).unwrap()
    }

    #[test]
    fn temporary_ids_are_unique_and_flagged() {
        let a = EntryId::temporary();
        let b = EntryId::temporary();
        assert_ne!(a, b);
        assert!(a.is_temporary());
        assert!(a.as_str().starts_with("tmp-"));
    }

    #[test]
    fn permanent_ids_reject_temporary_prefix() {
        assert!(EntryId::permanent("p1").is_ok());
        assert!(!EntryId::permanent("p1").unwrap().is_temporary());
        assert!(EntryId::permanent("tmp-123").is_err());
        assert!(EntryId::permanent("  ").is_err());
    }

    #[test]
    fn new_entry_is_empty_and_valid() {
        let entry = JournalEntry::new("user-1", day(), EntryKind::Morning, 1_000);
        assert!(entry.blocks.is_empty());
        assert_eq!(entry.created_at, entry.updated_at);
        assert!(entry.validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_owner() {
        let entry = JournalEntry::new(" ", day(), EntryKind::Freeform, 1_000);
        assert!(matches!(entry.validate(), Err(Error::InvalidData(_))));
    }

    #[test]
    fn preview_skips_blank_blocks() {
        let mut entry = JournalEntry::new("user-1", day(), EntryKind::Freeform, 1);
        entry.blocks = vec![
            Block::new(BlockContent::Paragraph { text: "  ".into() }, 1),
            Block::new(
                BlockContent::Quote {
                    text: "The obstacle is the way\nsecond line".into(),
                },
                1,
            ),
        ];
        assert_eq!(entry.preview(12), "The obstacle");
    }

    #[test]
    fn entry_kind_parses_case_insensitively() {
        assert_eq!("Evening".parse::<EntryKind>().unwrap(), EntryKind::Evening);
        assert!("weekly".parse::<EntryKind>().is_err());
    }

    #[test]
    fn entry_decodes_without_optional_fields() {
        let json = r#"{"id":"p9","owner_id":"u","date":"2024-03-14","created_at":1,"updated_at":2}"#;
        let entry: JournalEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.kind, EntryKind::Freeform);
        assert!(entry.blocks.is_empty());
        assert!(!entry.is_deleted);
    }
}
