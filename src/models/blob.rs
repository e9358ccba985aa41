//! Blob data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::extent::Locator;
use super::new_etag;

/// Blob type. Only block blobs are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BlobType {
    #[default]
    BlockBlob,
}

impl BlobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobType::BlockBlob => "BlockBlob",
        }
    }
}

/// Lease state of a blob. Recorded only; leases are not managed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LeaseState {
    #[default]
    Available,
    Leased,
    Expired,
    Breaking,
    Broken,
}

impl LeaseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseState::Available => "available",
            LeaseState::Leased => "leased",
            LeaseState::Expired => "expired",
            LeaseState::Breaking => "breaking",
            LeaseState::Broken => "broken",
        }
    }
}

/// Caller-settable HTTP headers of a blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobHttpHeaders {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    /// Raw MD5 digest bytes.
    pub content_md5: Option<Vec<u8>>,
    pub content_disposition: Option<String>,
    pub cache_control: Option<String>,
}

/// Blob properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobProperties {
    pub content_length: u64,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    /// Raw MD5 digest bytes.
    pub content_md5: Option<Vec<u8>>,
    pub content_disposition: Option<String>,
    pub cache_control: Option<String>,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub created_on: DateTime<Utc>,
    pub blob_type: BlobType,
    pub lease_state: LeaseState,
    pub server_encrypted: bool,
}

impl BlobProperties {
    /// Creates new blob properties for the given blob type.
    pub fn new(blob_type: BlobType, content_length: u64) -> Self {
        let now = Utc::now();
        Self {
            content_length,
            content_type: Some("application/octet-stream".to_string()),
            content_encoding: None,
            content_language: None,
            content_md5: None,
            content_disposition: None,
            cache_control: None,
            etag: new_etag(),
            last_modified: now,
            created_on: now,
            blob_type,
            lease_state: LeaseState::Available,
            server_encrypted: true,
        }
    }

    /// Updates the ETag and last modified time.
    pub fn update_etag(&mut self) {
        self.etag = new_etag();
        self.last_modified = Utc::now();
    }

    /// Replaces every HTTP header with the given set; unset headers are cleared.
    pub fn set_http_headers(&mut self, headers: &BlobHttpHeaders) {
        self.content_type = headers.content_type.clone();
        self.content_encoding = headers.content_encoding.clone();
        self.content_language = headers.content_language.clone();
        self.content_md5 = headers.content_md5.clone();
        self.content_disposition = headers.content_disposition.clone();
        self.cache_control = headers.cache_control.clone();
    }
}

/// Entry of a blob's committed block list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedBlock {
    /// Block id.
    pub name: String,
    pub size: u64,
    pub persistency: Locator,
}

/// Complete blob model stored in the blob metadata store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobModel {
    /// Account name.
    pub account: String,
    /// Container name.
    pub container: String,
    /// Blob name (full path).
    pub name: String,
    /// Snapshot timestamp (empty for base blob).
    pub snapshot: String,
    /// Listing position, assigned by the store.
    #[serde(default)]
    pub(crate) seq: u64,
    /// Hidden until a put or commit succeeds.
    pub is_committed: bool,
    /// Whether the blob is soft-deleted.
    pub deleted: bool,
    /// Blob properties.
    pub properties: BlobProperties,
    /// User-defined metadata.
    pub metadata: HashMap<String, String>,
    /// Block list of the last successful commit, in commit order.
    pub committed_blocks_in_order: Vec<CommittedBlock>,
    /// Extent range of a single-shot upload.
    pub persistency: Option<Locator>,
}

impl BlobModel {
    /// Creates a committed block blob record.
    pub fn new(account: String, container: String, name: String, content_length: u64) -> Self {
        Self {
            account,
            container,
            name,
            snapshot: String::new(),
            seq: 0,
            is_committed: true,
            deleted: false,
            properties: BlobProperties::new(BlobType::BlockBlob, content_length),
            metadata: HashMap::new(),
            committed_blocks_in_order: Vec::new(),
            persistency: None,
        }
    }

    /// Creates the hidden record of a blob that only has staged blocks.
    pub fn staged_placeholder(account: String, container: String, name: String) -> Self {
        let mut blob = Self::new(account, container, name, 0);
        blob.is_committed = false;
        blob
    }

    /// Whether listing and read operations may return this record.
    pub fn is_visible(&self) -> bool {
        self.is_committed && !self.deleted
    }

    /// Extent ids this record links, with repetition.
    pub fn extent_ids(&self) -> impl Iterator<Item = &str> {
        self.persistency
            .iter()
            .map(|p| p.id.as_str())
            .chain(
                self.committed_blocks_in_order
                    .iter()
                    .map(|b| b.persistency.id.as_str()),
            )
    }

    /// Extent ranges making up the blob content, in read order.
    pub fn content_locators(&self) -> Vec<Locator> {
        match &self.persistency {
            Some(locator) => vec![locator.clone()],
            None => self
                .committed_blocks_in_order
                .iter()
                .map(|b| b.persistency.clone())
                .collect(),
        }
    }
}
