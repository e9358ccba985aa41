//! Container data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::new_etag;

/// Container properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerProperties {
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

impl Default for ContainerProperties {
    fn default() -> Self {
        Self {
            etag: new_etag(),
            last_modified: Utc::now(),
        }
    }
}

impl ContainerProperties {
    /// Updates the ETag and last modified time.
    pub fn update_etag(&mut self) {
        self.etag = new_etag();
        self.last_modified = Utc::now();
    }
}

/// Complete container model stored in the blob metadata store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerModel {
    /// Account name.
    pub account: String,
    /// Container name.
    pub name: String,
    /// Listing position, assigned by the store.
    #[serde(default)]
    pub(crate) seq: u64,
    /// Container properties.
    pub properties: ContainerProperties,
    /// User-defined metadata.
    pub metadata: HashMap<String, String>,
}

impl ContainerModel {
    /// Creates a new container model.
    pub fn new(account: String, name: String) -> Self {
        Self {
            account,
            name,
            seq: 0,
            properties: ContainerProperties::default(),
            metadata: HashMap::new(),
        }
    }
}
