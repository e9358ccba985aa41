//! Metadata store for extents: id -> location, size and age.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::lifecycle::Lifecycle;
use super::snapshot;
use crate::config::{DEFAULT_LIST_PAGE_SIZE, DEFAULT_SAFETY_WINDOW};
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::{paginate, ExtentModel, Marker};

/// Trait for extent metadata operations.
#[async_trait]
pub trait ExtentMetadataStore: Send + Sync {
    // Lifecycle
    async fn init(&self) -> StorageResult<()>;
    fn is_initialized(&self) -> bool;
    async fn close(&self) -> StorageResult<()>;
    fn is_closed(&self) -> bool;
    /// Persists the current state, if the store is backed by a file.
    async fn flush(&self) -> StorageResult<()>;

    /// Inserts the extent, or updates size and last-modified of an existing id.
    async fn upsert_extent(&self, extent: ExtentModel) -> StorageResult<()>;

    /// Lists extents in insertion order.
    ///
    /// With `query_time`, only extents last modified before
    /// `query_time - safety_window` are returned.
    async fn list_extents(
        &self,
        id: Option<&str>,
        max_results: Option<u32>,
        marker: Option<Marker>,
        query_time: Option<DateTime<Utc>>,
    ) -> StorageResult<(Vec<ExtentModel>, Option<Marker>)>;

    async fn get_extent(&self, id: &str) -> StorageResult<ExtentModel>;

    /// Removes the metadata row. Physical bytes are the extent store's concern.
    async fn delete_extent(&self, id: &str) -> StorageResult<()>;

    /// Returns the id of the destination holding the extent.
    async fn resolve_location(&self, id: &str) -> StorageResult<String>;

    /// Enumerates all extent ids in batches, page by page.
    fn iterate_all(
        self: Arc<Self>,
        query_time: Option<DateTime<Utc>>,
        page_size: u32,
    ) -> ExtentIterator;
}

/// Batched, restartable enumeration of extent ids.
///
/// Every batch is an independent `list_extents` call driven by the last
/// marker, so an iterator can be rebuilt from [`ExtentIterator::marker`].
pub struct ExtentIterator {
    store: Arc<dyn ExtentMetadataStore>,
    query_time: Option<DateTime<Utc>>,
    page_size: u32,
    marker: Option<Marker>,
    done: bool,
}

impl ExtentIterator {
    pub fn new(
        store: Arc<dyn ExtentMetadataStore>,
        query_time: Option<DateTime<Utc>>,
        page_size: u32,
    ) -> Self {
        Self {
            store,
            query_time,
            page_size: page_size.max(1),
            marker: None,
            done: false,
        }
    }

    /// Continues after `marker` instead of from the beginning.
    pub fn resume(mut self, marker: Option<Marker>) -> Self {
        self.marker = marker;
        self
    }

    /// Marker of the last fetched page.
    pub fn marker(&self) -> Option<Marker> {
        self.marker
    }

    /// Fetches the next batch of ids; `None` once the listing is exhausted.
    pub async fn next_batch(&mut self) -> StorageResult<Option<Vec<String>>> {
        if self.done {
            return Ok(None);
        }

        let (page, next_marker) = self
            .store
            .list_extents(None, Some(self.page_size), self.marker, self.query_time)
            .await?;

        match next_marker {
            Some(marker) => self.marker = Some(marker),
            None => self.done = true,
        }

        if page.is_empty() {
            self.done = true;
            return Ok(None);
        }
        Ok(Some(page.into_iter().map(|extent| extent.id).collect()))
    }
}

#[derive(Default)]
struct ExtentTable {
    next_seq: u64,
    seq_by_id: HashMap<String, u64>,
    rows: BTreeMap<u64, ExtentModel>,
}

impl ExtentTable {
    fn clear(&mut self) {
        self.next_seq = 0;
        self.seq_by_id.clear();
        self.rows.clear();
    }

    fn get(&self, id: &str) -> Option<&ExtentModel> {
        self.seq_by_id.get(id).and_then(|seq| self.rows.get(seq))
    }
}

#[derive(Serialize, Deserialize)]
struct ExtentRow {
    seq: u64,
    extent: ExtentModel,
}

#[derive(Serialize, Deserialize)]
struct ExtentSnapshot {
    next_seq: u64,
    extents: Vec<ExtentRow>,
}

/// In-memory extent metadata store, optionally saved to a JSON file.
pub struct MemoryExtentMetadataStore {
    table: RwLock<ExtentTable>,
    path: Option<PathBuf>,
    safety_window: Duration,
    lifecycle: Lifecycle,
}

impl MemoryExtentMetadataStore {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(ExtentTable::default()),
            path: None,
            safety_window: DEFAULT_SAFETY_WINDOW,
            lifecycle: Lifecycle::default(),
        }
    }

    /// Persists the store to `path` on flush and close.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets the minimum age applied when listing with a query time.
    pub fn with_safety_window(mut self, safety_window: Duration) -> Self {
        self.safety_window = safety_window;
        self
    }

    fn cutoff(&self, query_time: DateTime<Utc>) -> StorageResult<DateTime<Utc>> {
        let window = chrono::Duration::from_std(self.safety_window).map_err(|_| {
            StorageError::with_message(ErrorCode::InvalidInput, "Safety window is out of range")
        })?;
        Ok(query_time - window)
    }

    fn snapshot(&self) -> ExtentSnapshot {
        let table = self.table.read();
        ExtentSnapshot {
            next_seq: table.next_seq,
            extents: table
                .rows
                .iter()
                .map(|(seq, extent)| ExtentRow {
                    seq: *seq,
                    extent: extent.clone(),
                })
                .collect(),
        }
    }

    fn restore(&self, snapshot: ExtentSnapshot) {
        let mut table = self.table.write();
        table.clear();
        for row in snapshot.extents {
            table.next_seq = table.next_seq.max(row.seq);
            table.seq_by_id.insert(row.extent.id.clone(), row.seq);
            table.rows.insert(row.seq, row.extent);
        }
        table.next_seq = table.next_seq.max(snapshot.next_seq);
    }
}

impl Default for MemoryExtentMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

const STORE_NAME: &str = "Extent metadata store";

#[async_trait]
impl ExtentMetadataStore for MemoryExtentMetadataStore {
    async fn init(&self) -> StorageResult<()> {
        if let Some(path) = &self.path {
            match snapshot::load::<ExtentSnapshot>(path).await? {
                Some(snapshot) => {
                    info!(
                        "Loaded {} extents from {}",
                        snapshot.extents.len(),
                        path.display()
                    );
                    self.restore(snapshot);
                }
                None => {
                    self.table.write().clear();
                    snapshot::save(path, &self.snapshot()).await?;
                }
            }
        }
        self.lifecycle.mark_initialized();
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.lifecycle.is_initialized()
    }

    async fn close(&self) -> StorageResult<()> {
        if self.lifecycle.ensure_open(STORE_NAME).is_ok() {
            self.flush().await?;
        }
        self.lifecycle.mark_closed();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    async fn flush(&self) -> StorageResult<()> {
        self.lifecycle.ensure_open(STORE_NAME)?;
        if let Some(path) = &self.path {
            let snapshot = self.snapshot();
            snapshot::save(path, &snapshot).await?;
            debug!("Saved {} extents to {}", snapshot.extents.len(), path.display());
        }
        Ok(())
    }

    async fn upsert_extent(&self, extent: ExtentModel) -> StorageResult<()> {
        self.lifecycle.ensure_open(STORE_NAME)?;
        let mut table = self.table.write();

        if let Some(seq) = table.seq_by_id.get(&extent.id).copied() {
            if let Some(row) = table.rows.get_mut(&seq) {
                row.size = extent.size;
                row.last_modified = extent.last_modified;
                return Ok(());
            }
        }

        table.next_seq += 1;
        let seq = table.next_seq;
        table.seq_by_id.insert(extent.id.clone(), seq);
        table.rows.insert(seq, extent);
        Ok(())
    }

    async fn list_extents(
        &self,
        id: Option<&str>,
        max_results: Option<u32>,
        marker: Option<Marker>,
        query_time: Option<DateTime<Utc>>,
    ) -> StorageResult<(Vec<ExtentModel>, Option<Marker>)> {
        self.lifecycle.ensure_open(STORE_NAME)?;
        let max_results = max_results.unwrap_or(DEFAULT_LIST_PAGE_SIZE) as usize;
        let cutoff = query_time.map(|t| self.cutoff(t)).transpose()?;
        let after = marker.map(|m| m.seq()).unwrap_or(0);

        let table = self.table.read();
        let matching: Vec<(u64, ExtentModel)> = table
            .rows
            .range(after.saturating_add(1)..)
            .filter(|(_, extent)| id.map_or(true, |id| extent.id == id))
            .filter(|(_, extent)| cutoff.map_or(true, |cutoff| extent.last_modified < cutoff))
            .take(max_results)
            .map(|(seq, extent)| (*seq, extent.clone()))
            .collect();
        drop(table);

        let (page, next_marker) = paginate(matching, max_results, |(seq, _)| *seq);
        Ok((
            page.into_iter().map(|(_, extent)| extent).collect(),
            next_marker,
        ))
    }

    async fn get_extent(&self, id: &str) -> StorageResult<ExtentModel> {
        self.lifecycle.ensure_open(STORE_NAME)?;
        self.table.read().get(id).cloned().ok_or_else(|| {
            StorageError::with_message(ErrorCode::ExtentNotFound, format!("Extent {} not found", id))
        })
    }

    async fn delete_extent(&self, id: &str) -> StorageResult<()> {
        self.lifecycle.ensure_open(STORE_NAME)?;
        let mut table = self.table.write();
        if let Some(seq) = table.seq_by_id.remove(id) {
            table.rows.remove(&seq);
        }
        Ok(())
    }

    async fn resolve_location(&self, id: &str) -> StorageResult<String> {
        self.get_extent(id).await.map(|extent| extent.location_id)
    }

    fn iterate_all(
        self: Arc<Self>,
        query_time: Option<DateTime<Utc>>,
        page_size: u32,
    ) -> ExtentIterator {
        ExtentIterator::new(self, query_time, page_size)
    }
}
