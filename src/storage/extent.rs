//! Extent store for blob data.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::{StreamExt, TryStreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io::{ErrorKind, SeekFrom};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

use super::extent_metadata::ExtentMetadataStore;
use crate::config::StoreDestination;
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::{ExtentModel, Locator};
use crate::stream::{bytes_stream, read_to_bytes, PayloadStream};

/// Trait for extent (blob data) storage operations.
#[async_trait]
pub trait ExtentStore: Send + Sync {
    /// Consumes `data` to completion and returns the range it was written to.
    ///
    /// The locator is only returned once every byte is flushed to the
    /// destination and the extent metadata reflects the new size.
    async fn append(&self, data: PayloadStream) -> StorageResult<Locator>;

    /// Streams back exactly the bytes of `locator`.
    async fn read(&self, locator: &Locator) -> StorageResult<PayloadStream>;

    /// Deletes an extent's metadata and bytes.
    ///
    /// Returns `false` when the extent is unknown or still receiving appends.
    async fn delete(&self, extent_id: &str) -> StorageResult<bool>;

    /// Returns the total size of all extents.
    async fn total_size(&self) -> u64;
}

fn range_error(locator: &Locator) -> StorageError {
    StorageError::with_message(
        ErrorCode::ExtentNotFound,
        format!(
            "Range of {} bytes at {} is outside extent {}",
            locator.count, locator.offset, locator.id
        ),
    )
}

fn not_found(extent_id: &str) -> StorageError {
    StorageError::with_message(
        ErrorCode::ExtentNotFound,
        format!("Extent {} not found", extent_id),
    )
}

/// Number of shards for the extent store (must be power of 2).
const NUM_SHARDS: usize = 64;

/// Location id recorded for extents held by [`MemoryExtentStore`].
pub const MEMORY_LOCATION: &str = "memory";

/// Sharded in-memory implementation of the extent store.
///
/// Every append becomes its own extent.
pub struct MemoryExtentStore {
    shards: Vec<DashMap<Arc<str>, Bytes>>,
    metadata: Arc<dyn ExtentMetadataStore>,
    current_size: AtomicU64,
}

impl MemoryExtentStore {
    pub fn new(metadata: Arc<dyn ExtentMetadataStore>) -> Self {
        let shards = (0..NUM_SHARDS).map(|_| DashMap::new()).collect();
        Self {
            shards,
            metadata,
            current_size: AtomicU64::new(0),
        }
    }

    #[inline]
    fn get_shard(&self, extent_id: &str) -> &DashMap<Arc<str>, Bytes> {
        let hash = extent_id
            .bytes()
            .take(8)
            .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
        &self.shards[hash % NUM_SHARDS]
    }
}

#[async_trait]
impl ExtentStore for MemoryExtentStore {
    async fn append(&self, data: PayloadStream) -> StorageResult<Locator> {
        let data = read_to_bytes(data).await?;
        let size = data.len() as u64;
        let extent_id = Uuid::new_v4().to_string();

        self.get_shard(&extent_id)
            .insert(Arc::from(extent_id.as_str()), data);
        self.current_size.fetch_add(size, Ordering::Relaxed);

        let extent = ExtentModel::new(extent_id.as_str(), size, MEMORY_LOCATION);
        if let Err(err) = self.metadata.upsert_extent(extent).await {
            if self.get_shard(&extent_id).remove(extent_id.as_str()).is_some() {
                self.current_size.fetch_sub(size, Ordering::Relaxed);
            }
            return Err(err);
        }

        Ok(Locator::new(extent_id, 0, size))
    }

    async fn read(&self, locator: &Locator) -> StorageResult<PayloadStream> {
        let shard = self.get_shard(&locator.id);
        let extent = shard
            .get(locator.id.as_str())
            .ok_or_else(|| not_found(&locator.id))?;

        let end = match locator.end() {
            Some(end) if end <= extent.len() as u64 => end,
            _ => return Err(range_error(locator)),
        };

        let data = extent.slice(locator.offset as usize..end as usize);
        Ok(bytes_stream(data))
    }

    async fn delete(&self, extent_id: &str) -> StorageResult<bool> {
        self.metadata.delete_extent(extent_id).await?;

        match self.get_shard(extent_id).remove(extent_id) {
            Some((_, data)) => {
                self.current_size
                    .fetch_sub(data.len() as u64, Ordering::Relaxed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn total_size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }
}

/// An extent file open for appends.
struct ActiveExtent {
    id: String,
    file: fs::File,
    /// End of the flushed data.
    offset: u64,
}

/// Active extents of one destination. An id is in `busy` while a writer has it.
#[derive(Default)]
struct ExtentPool {
    idle: Vec<ActiveExtent>,
    busy: HashSet<String>,
}

struct Destination {
    id: String,
    path: PathBuf,
    permits: Semaphore,
    pool: Mutex<ExtentPool>,
}

impl Destination {
    fn extent_path(&self, extent_id: &str) -> PathBuf {
        self.path.join(extent_id)
    }

    fn is_active(&self, extent_id: &str) -> bool {
        let pool = self.pool.lock();
        pool.busy.contains(extent_id) || pool.idle.iter().any(|e| e.id == extent_id)
    }

    fn checkout_idle(&self) -> Option<CheckedOut<'_>> {
        let mut pool = self.pool.lock();
        let extent = pool.idle.pop()?;
        pool.busy.insert(extent.id.clone());
        Some(CheckedOut {
            destination: self,
            extent: Some(extent),
        })
    }
}

/// A writer's claim on an active extent.
///
/// Dropping it without [`CheckedOut::release`] retires the extent, so a
/// failed or cancelled append never leaves a partial tail in the pool.
struct CheckedOut<'a> {
    destination: &'a Destination,
    extent: Option<ActiveExtent>,
}

impl CheckedOut<'_> {
    fn extent(&mut self) -> StorageResult<&mut ActiveExtent> {
        self.extent
            .as_mut()
            .ok_or_else(|| StorageError::new(ErrorCode::InternalError))
    }

    /// Returns the extent to the idle pool, or retires it once full.
    fn release(mut self, max_extent_size: u64) {
        let Some(extent) = self.extent.take() else {
            return;
        };
        let mut pool = self.destination.pool.lock();
        pool.busy.remove(&extent.id);
        if extent.offset < max_extent_size {
            pool.idle.push(extent);
        } else {
            debug!(
                "Extent {} reached {} bytes, retiring it",
                extent.id, extent.offset
            );
        }
    }
}

impl Drop for CheckedOut<'_> {
    fn drop(&mut self) {
        if let Some(extent) = self.extent.take() {
            self.destination.pool.lock().busy.remove(&extent.id);
            debug!("Retired extent {} after an interrupted append", extent.id);
        }
    }
}

async fn write_stream(file: &mut fs::File, mut data: PayloadStream) -> std::io::Result<u64> {
    let mut written = 0u64;
    while let Some(chunk) = data.try_next().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_data().await?;
    Ok(written)
}

/// File system implementation of the extent store.
///
/// Appends go round-robin over the configured destinations. Each destination
/// keeps a pool of active extents that successive appends fill up to
/// `max_extent_size`.
pub struct FsExtentStore {
    destinations: Vec<Destination>,
    by_location: HashMap<String, usize>,
    next: AtomicUsize,
    max_extent_size: u64,
    metadata: Arc<dyn ExtentMetadataStore>,
}

impl FsExtentStore {
    pub async fn new(
        destinations: &[StoreDestination],
        max_extent_size: u64,
        metadata: Arc<dyn ExtentMetadataStore>,
    ) -> StorageResult<Self> {
        if destinations.is_empty() {
            return Err(StorageError::with_message(
                ErrorCode::InvalidInput,
                "At least one extent destination is required",
            ));
        }

        let mut slots = Vec::with_capacity(destinations.len());
        let mut by_location = HashMap::new();
        for (index, dest) in destinations.iter().enumerate() {
            fs::create_dir_all(&dest.path).await.map_err(|e| {
                StorageError::with_message(
                    ErrorCode::IoError,
                    format!(
                        "Failed to create extent directory {}: {}",
                        dest.path.display(),
                        e
                    ),
                )
            })?;
            by_location.insert(dest.id.clone(), index);
            slots.push(Destination {
                id: dest.id.clone(),
                path: dest.path.clone(),
                permits: Semaphore::new(dest.max_concurrency.max(1)),
                pool: Mutex::new(ExtentPool::default()),
            });
        }

        Ok(Self {
            destinations: slots,
            by_location,
            next: AtomicUsize::new(0),
            max_extent_size,
            metadata,
        })
    }

    fn select_destination(&self) -> &Destination {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.destinations.len();
        &self.destinations[index]
    }

    fn destination(&self, location_id: &str) -> StorageResult<&Destination> {
        self.by_location
            .get(location_id)
            .map(|index| &self.destinations[*index])
            .ok_or_else(|| {
                StorageError::with_message(
                    ErrorCode::ExtentNotFound,
                    format!("Unknown extent location {}", location_id),
                )
            })
    }

    async fn create_extent<'a>(&self, destination: &'a Destination) -> StorageResult<CheckedOut<'a>> {
        let id = Uuid::new_v4().to_string();
        let path = destination.extent_path(&id);

        // Claimed before it is visible in metadata.
        destination.pool.lock().busy.insert(id.clone());
        let mut claim = CheckedOut {
            destination,
            extent: None,
        };

        let file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) => {
                destination.pool.lock().busy.remove(&id);
                return Err(e.into());
            }
        };
        claim.extent = Some(ActiveExtent {
            id: id.clone(),
            file,
            offset: 0,
        });

        if let Err(err) = self
            .metadata
            .upsert_extent(ExtentModel::new(id.as_str(), 0, destination.id.as_str()))
            .await
        {
            drop(claim);
            if let Err(e) = fs::remove_file(&path).await {
                warn!("Failed to remove extent file {}: {}", path.display(), e);
            }
            return Err(err);
        }

        debug!("Created extent {} in destination {}", id, destination.id);
        Ok(claim)
    }
}

#[async_trait]
impl ExtentStore for FsExtentStore {
    async fn append(&self, data: PayloadStream) -> StorageResult<Locator> {
        let destination = self.select_destination();
        let _permit = destination.permits.acquire().await.map_err(|_| {
            StorageError::with_message(
                ErrorCode::IoError,
                format!("Destination {} is closed", destination.id),
            )
        })?;

        let mut claim = match destination.checkout_idle() {
            Some(claim) => claim,
            None => self.create_extent(destination).await?,
        };

        let extent = claim.extent()?;
        let start = extent.offset;
        let written = match write_stream(&mut extent.file, data).await {
            Ok(written) => written,
            Err(e) => {
                warn!(
                    "Append to extent {} in {} failed: {}",
                    extent.id, destination.id, e
                );
                return Err(e.into());
            }
        };
        extent.offset += written;

        self.metadata
            .upsert_extent(ExtentModel::new(
                extent.id.as_str(),
                extent.offset,
                destination.id.as_str(),
            ))
            .await?;

        let locator = Locator::new(extent.id.clone(), start, written);
        claim.release(self.max_extent_size);
        Ok(locator)
    }

    async fn read(&self, locator: &Locator) -> StorageResult<PayloadStream> {
        let location = self.metadata.resolve_location(&locator.id).await?;
        let destination = self.destination(&location)?;

        let mut file = match fs::File::open(destination.extent_path(&locator.id)).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found(&locator.id)),
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await?.len();
        if !locator.end().is_some_and(|end| end <= len) {
            return Err(range_error(locator));
        }

        file.seek(SeekFrom::Start(locator.offset)).await?;
        Ok(ReaderStream::new(file.take(locator.count)).boxed())
    }

    async fn delete(&self, extent_id: &str) -> StorageResult<bool> {
        let extent = match self.metadata.get_extent(extent_id).await {
            Ok(extent) => extent,
            Err(e) if e.code == ErrorCode::ExtentNotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        let destination = match self.destination(&extent.location_id) {
            Ok(destination) => destination,
            Err(_) => {
                warn!(
                    "Extent {} is recorded in unknown location {}",
                    extent_id, extent.location_id
                );
                return Ok(false);
            }
        };
        if destination.is_active(extent_id) {
            return Ok(false);
        }

        self.metadata.delete_extent(extent_id).await?;
        match fs::remove_file(destination.extent_path(extent_id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!("Deleted extent {} from {}", extent_id, destination.id);
        Ok(true)
    }

    async fn total_size(&self) -> u64 {
        let mut total = 0;
        let mut marker = None;
        loop {
            let (page, next) = match self.metadata.list_extents(None, None, marker, None).await {
                Ok(result) => result,
                Err(e) => {
                    warn!("Failed to list extents: {}", e);
                    return total;
                }
            };
            total += page
                .iter()
                .filter(|extent| self.by_location.contains_key(&extent.location_id))
                .map(|extent| extent.size)
                .sum::<u64>();
            match next {
                Some(next) => marker = Some(next),
                None => return total,
            }
        }
    }
}
