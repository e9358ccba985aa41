//! Block data models for block blobs.

use serde::{Deserialize, Serialize};

use super::extent::Locator;

/// Where a commit looks up a block id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockListKind {
    /// Must be in the blob's current committed list.
    Committed,
    /// Must be among the blob's staged blocks.
    Uncommitted,
    /// Staged block if present, else the committed one.
    Latest,
}

impl BlockListKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockListKind::Committed => "Committed",
            BlockListKind::Uncommitted => "Uncommitted",
            BlockListKind::Latest => "Latest",
        }
    }
}

/// One entry of a commit request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLookup {
    pub block_id: String,
    pub kind: BlockListKind,
}

impl BlockLookup {
    pub fn new(block_id: impl Into<String>, kind: BlockListKind) -> Self {
        Self {
            block_id: block_id.into(),
            kind,
        }
    }

    pub fn latest(block_id: impl Into<String>) -> Self {
        Self::new(block_id, BlockListKind::Latest)
    }
}

/// Block list type for GetBlockList operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockListType {
    Committed,
    Uncommitted,
    #[default]
    All,
}

/// A block record, keyed by (account, container, blob, block id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockModel {
    /// Account name.
    pub account: String,
    /// Container name.
    pub container: String,
    /// Blob name.
    pub blob: String,
    /// Block ID (base64 encoded).
    pub block_id: String,
    /// Block size in bytes.
    pub size: u64,
    /// Reference to extent data.
    pub persistency: Locator,
    /// Promoted by a commit.
    pub is_committed: bool,
    /// No longer linked by the blob; reclaimed by the next GC sweep.
    #[serde(default)]
    pub orphaned: bool,
}

impl BlockModel {
    /// Creates a staged block record.
    pub fn new(
        account: String,
        container: String,
        blob: String,
        block_id: String,
        size: u64,
        persistency: Locator,
    ) -> Self {
        Self {
            account,
            container,
            blob,
            block_id,
            size,
            persistency,
            is_committed: false,
            orphaned: false,
        }
    }

    /// Staged and not yet consumed by a commit.
    pub fn is_staged(&self) -> bool {
        !self.is_committed && !self.orphaned
    }
}

/// Block entry as reported by GetBlockList.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub name: String,
    pub size: u64,
}

/// Result of GetBlockList.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockList {
    /// In last-commit order.
    pub committed: Vec<BlockInfo>,
    /// In no particular order.
    pub uncommitted: Vec<BlockInfo>,
}
