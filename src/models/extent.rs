//! Extent records and persistency locators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Byte range inside one extent, as returned by the extent store.
///
/// Blob and block records store locators verbatim; only the extent store
/// interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    /// Id of the extent holding the bytes.
    pub id: String,
    /// Byte offset within the extent.
    pub offset: u64,
    /// Number of bytes.
    pub count: u64,
}

impl Locator {
    pub fn new(id: impl Into<String>, offset: u64, count: u64) -> Self {
        Self {
            id: id.into(),
            offset,
            count,
        }
    }

    /// Offset one past the last byte of the range, or `None` if it overflows.
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.count)
    }
}

/// Metadata row for one extent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtentModel {
    pub id: String,
    /// Bytes written to the extent so far.
    pub size: u64,
    /// Id of the physical destination holding the extent.
    pub location_id: String,
    pub last_modified: DateTime<Utc>,
}

impl ExtentModel {
    pub fn new(id: impl Into<String>, size: u64, location_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            size,
            location_id: location_id.into(),
            last_modified: Utc::now(),
        }
    }
}
