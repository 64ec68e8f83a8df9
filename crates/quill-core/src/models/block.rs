//! Content blocks inside a journal entry

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// Stable identifier of a block; never regenerated once assigned
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(String);

impl BlockId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BlockId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for BlockId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Closed set of block kinds the editor can produce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockContent {
    Paragraph { text: String },
    Heading { text: String, level: u8 },
    Quote { text: String },
    ListItem { text: String },
    Todo {
        text: String,
        #[serde(default)]
        checked: bool,
    },
}

impl BlockContent {
    /// Same kind of block carrying `text`
    #[must_use]
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        let text = text.into();
        match self {
            Self::Paragraph { .. } => Self::Paragraph { text },
            Self::Heading { level, .. } => Self::Heading {
                text,
                level: *level,
            },
            Self::Quote { .. } => Self::Quote { text },
            Self::ListItem { .. } => Self::ListItem { text },
            Self::Todo { checked, .. } => Self::Todo {
                text,
                checked: *checked,
            },
        }
    }
}

/// One block of entry content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    #[serde(flatten)]
    pub content: BlockContent,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
}

impl Block {
    /// Create a block with a fresh id
    #[must_use]
    pub fn new(content: BlockContent, created_at: i64) -> Self {
        Self {
            id: BlockId::new(),
            content,
            created_at,
        }
    }

    /// Shorthand for a paragraph block
    #[must_use]
    pub fn paragraph(text: impl Into<String>, created_at: i64) -> Self {
        Self::new(BlockContent::Paragraph { text: text.into() }, created_at)
    }

    #[must_use]
    pub fn text(&self) -> &str {
        match &self.content {
            BlockContent::Paragraph { text }
            | BlockContent::Heading { text, .. }
            | BlockContent::Quote { text }
            | BlockContent::ListItem { text }
            | BlockContent::Todo { text, .. } => text,
        }
    }
}

/// Check block-level invariants: non-empty unique ids and sane heading levels.
pub(crate) fn validate_blocks(blocks: &[Block]) -> Result<(), String> {
    let mut seen = HashSet::with_capacity(blocks.len());
    for block in blocks {
        if block.id.as_str().trim().is_empty() {
            return Err("block with empty id".to_string());
        }
        if !seen.insert(block.id.as_str()) {
            return Err(format!("duplicate block id {}", block.id));
        }
        if let BlockContent::Heading { level, .. } = block.content {
            if !(1..=3).contains(&level) {
                return Err(format!("heading level {level} out of range"));
            }
        }
    }
    Ok(())
}
