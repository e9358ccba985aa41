//! Metadata store for containers, blobs, and blocks.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::keyed_lock::KeyedLocks;
use super::lifecycle::Lifecycle;
use super::snapshot;
use crate::config::DEFAULT_LIST_PAGE_SIZE;
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::{
    paginate, BlobHttpHeaders, BlobModel, BlockInfo, BlockList, BlockListKind, BlockLookup,
    BlockModel, CommittedBlock, ContainerModel, Marker, ServiceProperties,
};

/// Trait for blob metadata operations.
///
/// Records reference blob content only through extent locators; the bytes
/// themselves live in an [`ExtentStore`](super::ExtentStore).
#[async_trait]
pub trait BlobMetadataStore: Send + Sync {
    // Lifecycle
    async fn init(&self) -> StorageResult<()>;
    fn is_initialized(&self) -> bool;
    async fn close(&self) -> StorageResult<()>;
    fn is_closed(&self) -> bool;
    async fn flush(&self) -> StorageResult<()>;

    // Service properties
    async fn get_service_properties(&self, account: &str) -> StorageResult<ServiceProperties>;
    async fn set_service_properties(
        &self,
        account: &str,
        properties: ServiceProperties,
    ) -> StorageResult<()>;

    // Container operations
    async fn create_container(&self, container: ContainerModel) -> StorageResult<ContainerModel>;
    async fn get_container_properties(
        &self,
        account: &str,
        name: &str,
    ) -> StorageResult<ContainerModel>;
    async fn set_container_metadata(
        &self,
        account: &str,
        name: &str,
        metadata: HashMap<String, String>,
    ) -> StorageResult<ContainerModel>;
    /// Deletes the container and every blob in it.
    async fn delete_container(&self, account: &str, name: &str) -> StorageResult<()>;
    async fn list_containers(
        &self,
        account: &str,
        prefix: Option<&str>,
        max_results: Option<u32>,
        marker: Option<Marker>,
    ) -> StorageResult<(Vec<ContainerModel>, Option<Marker>)>;

    // Blob operations
    /// Lists committed blobs in creation order.
    async fn list_blobs(
        &self,
        account: &str,
        container: &str,
        prefix: Option<&str>,
        max_results: Option<u32>,
        marker: Option<Marker>,
    ) -> StorageResult<(Vec<BlobModel>, Option<Marker>)>;
    /// Replaces the blob's whole state with `blob`, a single-shot upload.
    async fn put_blob(&self, blob: BlobModel) -> StorageResult<BlobModel>;
    async fn get_blob_properties(
        &self,
        account: &str,
        container: &str,
        blob: &str,
        snapshot: &str,
    ) -> StorageResult<BlobModel>;
    async fn delete_blob(
        &self,
        account: &str,
        container: &str,
        blob: &str,
        snapshot: &str,
    ) -> StorageResult<()>;
    async fn set_blob_http_headers(
        &self,
        account: &str,
        container: &str,
        blob: &str,
        headers: &BlobHttpHeaders,
    ) -> StorageResult<BlobModel>;
    async fn set_blob_metadata(
        &self,
        account: &str,
        container: &str,
        blob: &str,
        metadata: HashMap<String, String>,
    ) -> StorageResult<BlobModel>;

    // Block operations
    /// Stages a block; the last write for a block id wins.
    async fn stage_block(&self, block: BlockModel) -> StorageResult<()>;
    /// Commits `refs` in order as the blob's new content.
    ///
    /// `template` carries the account, container, name, HTTP headers and
    /// metadata of the committed blob. All references are resolved before
    /// anything changes; an unresolved one fails with `InvalidBlockList`.
    async fn commit_block_list(
        &self,
        template: BlobModel,
        refs: &[BlockLookup],
        if_match: Option<&str>,
    ) -> StorageResult<BlobModel>;
    async fn get_block_list(
        &self,
        account: &str,
        container: &str,
        blob: &str,
    ) -> StorageResult<BlockList>;

    // Garbage collection support
    /// Whether any blob or block record still links the extent.
    async fn has_extent_reference(&self, extent_id: &str) -> StorageResult<bool>;
    /// Removes block records no blob links anymore; returns how many.
    async fn purge_orphaned_blocks(&self) -> StorageResult<usize>;
}

/// Key type for containers - uses Arc<str> to avoid allocations.
type ContainerKey = (Arc<str>, Arc<str>);

/// Key type for blobs: account, container, name, snapshot.
type BlobKey = (Arc<str>, Arc<str>, Arc<str>, Arc<str>);

/// Key type for blocks: account, container, blob, block id.
type BlockKey = (Arc<str>, Arc<str>, Arc<str>, Arc<str>);

/// Account, container, blob. Serializes mutations of one blob.
type BlobLockKey = (Arc<str>, Arc<str>, Arc<str>);

#[derive(Serialize, Deserialize, Default)]
struct BlobSnapshot {
    next_seq: u64,
    containers: Vec<ContainerModel>,
    blobs: Vec<BlobModel>,
    blocks: Vec<BlockModel>,
    service_properties: Vec<(String, ServiceProperties)>,
}

const STORE_NAME: &str = "Blob metadata store";

/// In-memory implementation of the blob metadata store, optionally saved to
/// a JSON file.
pub struct MemoryBlobMetadataStore {
    /// Containers indexed by (account, name).
    containers: DashMap<ContainerKey, ContainerModel>,

    /// Blobs indexed by (account, container, name, snapshot).
    blobs: DashMap<BlobKey, BlobModel>,

    /// Secondary index: account+container -> names of base blobs.
    blob_index: DashMap<ContainerKey, HashSet<Arc<str>>>,

    /// Block records indexed by (account, container, blob, block_id).
    blocks: DashMap<BlockKey, BlockModel>,

    /// Secondary index: account+container+blob -> set of block_ids.
    block_index: DashMap<BlobLockKey, HashSet<Arc<str>>>,

    /// Service properties indexed by account.
    service_properties: DashMap<Arc<str>, ServiceProperties>,

    /// Extent id -> number of blob and block records linking it.
    extent_refs: DashMap<Arc<str>, usize>,

    blob_locks: KeyedLocks<BlobLockKey>,

    /// Shared by blob mutations, exclusive for container deletion.
    container_guard: RwLock<()>,

    next_seq: AtomicU64,
    path: Option<PathBuf>,
    lifecycle: Lifecycle,
}

impl MemoryBlobMetadataStore {
    pub fn new() -> Self {
        Self {
            containers: DashMap::new(),
            blobs: DashMap::new(),
            blob_index: DashMap::new(),
            blocks: DashMap::new(),
            block_index: DashMap::new(),
            service_properties: DashMap::new(),
            extent_refs: DashMap::new(),
            blob_locks: KeyedLocks::new(),
            container_guard: RwLock::new(()),
            next_seq: AtomicU64::new(0),
            path: None,
            lifecycle: Lifecycle::default(),
        }
    }

    /// Persists the store to `path` on flush and close.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Create an Arc<str> key from a string slice.
    #[inline]
    fn arc_str(s: &str) -> Arc<str> {
        Arc::from(s)
    }

    #[inline]
    fn container_key(account: &str, name: &str) -> ContainerKey {
        (Self::arc_str(account), Self::arc_str(name))
    }

    #[inline]
    fn blob_key(account: &str, container: &str, name: &str, snapshot: &str) -> BlobKey {
        (
            Self::arc_str(account),
            Self::arc_str(container),
            Self::arc_str(name),
            Self::arc_str(snapshot),
        )
    }

    #[inline]
    fn lock_key(account: &str, container: &str, blob: &str) -> BlobLockKey {
        (
            Self::arc_str(account),
            Self::arc_str(container),
            Self::arc_str(blob),
        )
    }

    #[inline]
    fn block_key(lock_key: &BlobLockKey, block_id: &str) -> BlockKey {
        (
            lock_key.0.clone(),
            lock_key.1.clone(),
            lock_key.2.clone(),
            Self::arc_str(block_id),
        )
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn ensure_container(&self, account: &str, container: &str) -> StorageResult<()> {
        if self
            .containers
            .contains_key(&Self::container_key(account, container))
        {
            Ok(())
        } else {
            Err(StorageError::new(ErrorCode::ContainerNotFound))
        }
    }

    fn retain_refs<'a>(&self, extent_ids: impl Iterator<Item = &'a str>) {
        for id in extent_ids {
            *self.extent_refs.entry(Self::arc_str(id)).or_insert(0) += 1;
        }
    }

    fn release_refs<'a>(&self, extent_ids: impl Iterator<Item = &'a str>) {
        for id in extent_ids {
            if let Entry::Occupied(mut entry) = self.extent_refs.entry(Self::arc_str(id)) {
                let count = entry.get_mut();
                *count = count.saturating_sub(1);
                if *count == 0 {
                    entry.remove();
                }
            }
        }
    }

    /// Stores `blob`, keeping the reference index and the blob index in step.
    fn replace_blob(&self, blob: BlobModel) -> Option<BlobModel> {
        let key = Self::blob_key(&blob.account, &blob.container, &blob.name, &blob.snapshot);
        self.retain_refs(blob.extent_ids());
        if blob.snapshot.is_empty() {
            self.blob_index
                .entry(Self::container_key(&blob.account, &blob.container))
                .or_default()
                .insert(key.2.clone());
        }

        let previous = self.blobs.insert(key, blob);
        if let Some(previous) = &previous {
            self.release_refs(previous.extent_ids());
        }
        previous
    }

    fn remove_blob_record(&self, key: &BlobKey) -> Option<BlobModel> {
        let (_, removed) = self.blobs.remove(key)?;
        self.release_refs(removed.extent_ids());
        if key.3.is_empty() {
            let index_key = (key.0.clone(), key.1.clone());
            if let Some(mut names) = self.blob_index.get_mut(&index_key) {
                names.remove(&key.2);
            }
            self.blob_index
                .remove_if(&index_key, |_, names| names.is_empty());
        }
        Some(removed)
    }

    fn replace_block(&self, block: BlockModel) {
        let lock_key = Self::lock_key(&block.account, &block.container, &block.blob);
        let key = Self::block_key(&lock_key, &block.block_id);
        self.retain_refs(std::iter::once(block.persistency.id.as_str()));
        self.block_index
            .entry(lock_key)
            .or_default()
            .insert(key.3.clone());

        if let Some(previous) = self.blocks.insert(key, block) {
            self.release_refs(std::iter::once(previous.persistency.id.as_str()));
        }
    }

    fn remove_block_record(&self, key: &BlockKey, only_orphaned: bool) -> Option<BlockModel> {
        let (_, removed) = self
            .blocks
            .remove_if(key, |_, block| !only_orphaned || block.orphaned)?;
        self.release_refs(std::iter::once(removed.persistency.id.as_str()));

        let lock_key = (key.0.clone(), key.1.clone(), key.2.clone());
        if let Some(mut ids) = self.block_index.get_mut(&lock_key) {
            ids.remove(&key.3);
        }
        self.block_index.remove_if(&lock_key, |_, ids| ids.is_empty());
        Some(removed)
    }

    fn block_records(&self, lock_key: &BlobLockKey) -> Vec<BlockModel> {
        let block_ids: Vec<Arc<str>> = self
            .block_index
            .get(lock_key)
            .map(|entry| entry.iter().cloned().collect())
            .unwrap_or_default();

        block_ids
            .into_iter()
            .filter_map(|block_id| {
                let key = (
                    lock_key.0.clone(),
                    lock_key.1.clone(),
                    lock_key.2.clone(),
                    block_id,
                );
                self.blocks.get(&key).map(|entry| entry.value().clone())
            })
            .collect()
    }

    /// Marks the blob's block records orphaned, except the ones `keep` accepts.
    fn orphan_blocks(&self, lock_key: &BlobLockKey, keep: impl Fn(&BlockModel) -> bool) {
        let block_ids: Vec<Arc<str>> = self
            .block_index
            .get(lock_key)
            .map(|entry| entry.iter().cloned().collect())
            .unwrap_or_default();

        for block_id in block_ids {
            let key = (
                lock_key.0.clone(),
                lock_key.1.clone(),
                lock_key.2.clone(),
                block_id,
            );
            if let Some(mut block) = self.blocks.get_mut(&key) {
                if !keep(&block) {
                    block.orphaned = true;
                }
            }
        }
    }

    fn visible_blob(&self, key: &BlobKey) -> StorageResult<BlobModel> {
        self.blobs
            .get(key)
            .filter(|b| b.is_visible())
            .map(|b| b.value().clone())
            .ok_or_else(|| StorageError::new(ErrorCode::BlobNotFound))
    }

    fn update_visible_blob(
        &self,
        account: &str,
        container: &str,
        blob: &str,
        update: impl FnOnce(&mut BlobModel),
    ) -> StorageResult<BlobModel> {
        self.lifecycle.ensure_open(STORE_NAME)?;
        let _container = self.container_guard.read();
        self.ensure_container(account, container)?;
        let _guard = self.blob_locks.lock(&Self::lock_key(account, container, blob));

        let key = Self::blob_key(account, container, blob, "");
        let mut entry = self
            .blobs
            .get_mut(&key)
            .filter(|b| b.is_visible())
            .ok_or_else(|| StorageError::new(ErrorCode::BlobNotFound))?;
        update(entry.value_mut());
        entry.properties.update_etag();
        Ok(entry.value().clone())
    }

    fn snapshot(&self) -> BlobSnapshot {
        BlobSnapshot {
            next_seq: self.next_seq.load(Ordering::SeqCst),
            containers: self.containers.iter().map(|e| e.value().clone()).collect(),
            blobs: self.blobs.iter().map(|e| e.value().clone()).collect(),
            blocks: self.blocks.iter().map(|e| e.value().clone()).collect(),
            service_properties: self
                .service_properties
                .iter()
                .map(|e| (e.key().to_string(), e.value().clone()))
                .collect(),
        }
    }

    fn restore(&self, snapshot: BlobSnapshot) {
        self.containers.clear();
        self.blobs.clear();
        self.blob_index.clear();
        self.blocks.clear();
        self.block_index.clear();
        self.service_properties.clear();
        self.extent_refs.clear();

        let mut next_seq = snapshot.next_seq;
        for container in snapshot.containers {
            next_seq = next_seq.max(container.seq);
            self.containers.insert(
                Self::container_key(&container.account, &container.name),
                container,
            );
        }
        for blob in snapshot.blobs {
            next_seq = next_seq.max(blob.seq);
            self.replace_blob(blob);
        }
        for block in snapshot.blocks {
            self.replace_block(block);
        }
        for (account, properties) in snapshot.service_properties {
            self.service_properties
                .insert(Self::arc_str(&account), properties);
        }
        self.next_seq.store(next_seq, Ordering::SeqCst);
    }
}

impl Default for MemoryBlobMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves a commit request against the blob's committed list and its staged
/// blocks, in request order.
///
/// Returns the new committed list and the ids of staged blocks it uses.
fn resolve_block_list(
    refs: &[BlockLookup],
    committed: &[CommittedBlock],
    staged: &HashMap<String, BlockModel>,
) -> StorageResult<(Vec<CommittedBlock>, HashSet<String>)> {
    let committed_by_name: HashMap<&str, &CommittedBlock> =
        committed.iter().map(|b| (b.name.as_str(), b)).collect();
    let from_staged = |id: &str| {
        staged.get(id).map(|block| CommittedBlock {
            name: block.block_id.clone(),
            size: block.size,
            persistency: block.persistency.clone(),
        })
    };
    let from_committed = |id: &str| committed_by_name.get(id).map(|b| (*b).clone());

    let mut resolved = Vec::with_capacity(refs.len());
    let mut promoted = HashSet::new();
    for lookup in refs {
        let id = lookup.block_id.as_str();
        let (block, staged_hit) = match lookup.kind {
            BlockListKind::Committed => (from_committed(id), false),
            BlockListKind::Uncommitted => (from_staged(id), true),
            BlockListKind::Latest => match from_staged(id) {
                Some(block) => (Some(block), true),
                None => (from_committed(id), false),
            },
        };

        let block = block.ok_or_else(|| {
            StorageError::with_message(
                ErrorCode::InvalidBlockList,
                format!(
                    "Block {} was not found in the {} block list",
                    id,
                    lookup.kind.as_str()
                ),
            )
        })?;
        if staged_hit {
            promoted.insert(block.name.clone());
        }
        resolved.push(block);
    }
    Ok((resolved, promoted))
}

#[async_trait]
impl BlobMetadataStore for MemoryBlobMetadataStore {
    async fn init(&self) -> StorageResult<()> {
        if let Some(path) = &self.path {
            match snapshot::load::<BlobSnapshot>(path).await? {
                Some(snapshot) => {
                    info!(
                        "Loaded {} containers and {} blobs from {}",
                        snapshot.containers.len(),
                        snapshot.blobs.len(),
                        path.display()
                    );
                    self.restore(snapshot);
                }
                None => snapshot::save(path, &BlobSnapshot::default()).await?,
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
            debug!(
                "Saved {} blobs and {} blocks to {}",
                snapshot.blobs.len(),
                snapshot.blocks.len(),
                path.display()
            );
        }
        Ok(())
    }

    async fn get_service_properties(&self, account: &str) -> StorageResult<ServiceProperties> {
        self.lifecycle.ensure_open(STORE_NAME)?;
        Ok(self
            .service_properties
            .get(account)
            .map(|p| p.value().clone())
            .unwrap_or_default())
    }

    async fn set_service_properties(
        &self,
        account: &str,
        properties: ServiceProperties,
    ) -> StorageResult<()> {
        self.lifecycle.ensure_open(STORE_NAME)?;
        self.service_properties
            .insert(Self::arc_str(account), properties);
        Ok(())
    }

    async fn create_container(
        &self,
        mut container: ContainerModel,
    ) -> StorageResult<ContainerModel> {
        self.lifecycle.ensure_open(STORE_NAME)?;
        let key = Self::container_key(&container.account, &container.name);
        match self.containers.entry(key) {
            Entry::Occupied(_) => Err(StorageError::new(ErrorCode::ContainerAlreadyExists)),
            Entry::Vacant(slot) => {
                container.seq = self.next_seq();
                container.properties.update_etag();
                slot.insert(container.clone());
                Ok(container)
            }
        }
    }

    async fn get_container_properties(
        &self,
        account: &str,
        name: &str,
    ) -> StorageResult<ContainerModel> {
        self.lifecycle.ensure_open(STORE_NAME)?;
        self.containers
            .get(&Self::container_key(account, name))
            .map(|c| c.value().clone())
            .ok_or_else(|| StorageError::new(ErrorCode::ContainerNotFound))
    }

    async fn set_container_metadata(
        &self,
        account: &str,
        name: &str,
        metadata: HashMap<String, String>,
    ) -> StorageResult<ContainerModel> {
        self.lifecycle.ensure_open(STORE_NAME)?;
        let mut container = self
            .containers
            .get_mut(&Self::container_key(account, name))
            .ok_or_else(|| StorageError::new(ErrorCode::ContainerNotFound))?;
        container.metadata = metadata;
        container.properties.update_etag();
        Ok(container.value().clone())
    }

    async fn delete_container(&self, account: &str, name: &str) -> StorageResult<()> {
        self.lifecycle.ensure_open(STORE_NAME)?;
        let _container = self.container_guard.write();

        self.containers
            .remove(&Self::container_key(account, name))
            .ok_or_else(|| StorageError::new(ErrorCode::ContainerNotFound))?;

        let blob_keys: Vec<BlobKey> = self
            .blobs
            .iter()
            .filter(|e| e.key().0.as_ref() == account && e.key().1.as_ref() == name)
            .map(|e| e.key().clone())
            .collect();
        for key in &blob_keys {
            self.remove_blob_record(key);
        }

        let blocked_blobs: Vec<BlobLockKey> = self
            .block_index
            .iter()
            .filter(|e| e.key().0.as_ref() == account && e.key().1.as_ref() == name)
            .map(|e| e.key().clone())
            .collect();
        for lock_key in &blocked_blobs {
            self.orphan_blocks(lock_key, |_| false);
        }

        debug!(
            "Deleted container {}/{} with {} blobs",
            account,
            name,
            blob_keys.len()
        );
        Ok(())
    }

    async fn list_containers(
        &self,
        account: &str,
        prefix: Option<&str>,
        max_results: Option<u32>,
        marker: Option<Marker>,
    ) -> StorageResult<(Vec<ContainerModel>, Option<Marker>)> {
        self.lifecycle.ensure_open(STORE_NAME)?;
        let max_results = max_results.unwrap_or(DEFAULT_LIST_PAGE_SIZE) as usize;
        let after = marker.map(|m| m.seq()).unwrap_or(0);

        let matching: Vec<ContainerModel> = self
            .containers
            .iter()
            .filter(|entry| {
                let (acct, name) = entry.key();
                acct.as_ref() == account
                    && prefix.map_or(true, |p| name.starts_with(p))
                    && entry.value().seq > after
            })
            .map(|entry| entry.value().clone())
            .collect();

        Ok(paginate(matching, max_results, |c| c.seq))
    }

    async fn list_blobs(
        &self,
        account: &str,
        container: &str,
        prefix: Option<&str>,
        max_results: Option<u32>,
        marker: Option<Marker>,
    ) -> StorageResult<(Vec<BlobModel>, Option<Marker>)> {
        self.lifecycle.ensure_open(STORE_NAME)?;
        self.ensure_container(account, container)?;
        let max_results = max_results.unwrap_or(DEFAULT_LIST_PAGE_SIZE) as usize;
        let after = marker.map(|m| m.seq()).unwrap_or(0);

        let names: Vec<Arc<str>> = self
            .blob_index
            .get(&Self::container_key(account, container))
            .map(|entry| {
                entry
                    .iter()
                    .filter(|name| prefix.map_or(true, |p| name.starts_with(p)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let account_arc = Self::arc_str(account);
        let container_arc = Self::arc_str(container);
        let empty_snapshot = Self::arc_str("");
        let matching: Vec<BlobModel> = names
            .into_iter()
            .filter_map(|name| {
                let key = (
                    account_arc.clone(),
                    container_arc.clone(),
                    name,
                    empty_snapshot.clone(),
                );
                self.blobs
                    .get(&key)
                    .filter(|b| b.is_visible() && b.seq > after)
                    .map(|b| b.value().clone())
            })
            .collect();

        Ok(paginate(matching, max_results, |b| b.seq))
    }

    async fn put_blob(&self, mut blob: BlobModel) -> StorageResult<BlobModel> {
        self.lifecycle.ensure_open(STORE_NAME)?;
        let _container = self.container_guard.read();
        self.ensure_container(&blob.account, &blob.container)?;
        let lock_key = Self::lock_key(&blob.account, &blob.container, &blob.name);
        let _guard = self.blob_locks.lock(&lock_key);

        let key = Self::blob_key(&blob.account, &blob.container, &blob.name, &blob.snapshot);
        let existing = self
            .blobs
            .get(&key)
            .map(|b| (b.seq, b.is_visible().then_some(b.properties.created_on)));
        blob.seq = match existing {
            Some((seq, created_on)) => {
                if let Some(created_on) = created_on {
                    blob.properties.created_on = created_on;
                }
                seq
            }
            None => self.next_seq(),
        };
        blob.is_committed = true;
        blob.deleted = false;
        blob.committed_blocks_in_order.clear();
        blob.properties.update_etag();

        self.replace_blob(blob.clone());
        self.orphan_blocks(&lock_key, |_| false);
        Ok(blob)
    }

    async fn get_blob_properties(
        &self,
        account: &str,
        container: &str,
        blob: &str,
        snapshot: &str,
    ) -> StorageResult<BlobModel> {
        self.lifecycle.ensure_open(STORE_NAME)?;
        self.ensure_container(account, container)?;
        self.visible_blob(&Self::blob_key(account, container, blob, snapshot))
    }

    async fn delete_blob(
        &self,
        account: &str,
        container: &str,
        blob: &str,
        snapshot: &str,
    ) -> StorageResult<()> {
        self.lifecycle.ensure_open(STORE_NAME)?;
        let _container = self.container_guard.read();
        self.ensure_container(account, container)?;
        let lock_key = Self::lock_key(account, container, blob);
        let _guard = self.blob_locks.lock(&lock_key);

        let key = Self::blob_key(account, container, blob, snapshot);
        self.visible_blob(&key)?;
        self.remove_blob_record(&key);
        if snapshot.is_empty() {
            self.orphan_blocks(&lock_key, |_| false);
        }
        Ok(())
    }

    async fn set_blob_http_headers(
        &self,
        account: &str,
        container: &str,
        blob: &str,
        headers: &BlobHttpHeaders,
    ) -> StorageResult<BlobModel> {
        self.update_visible_blob(account, container, blob, |model| {
            model.properties.set_http_headers(headers)
        })
    }

    async fn set_blob_metadata(
        &self,
        account: &str,
        container: &str,
        blob: &str,
        metadata: HashMap<String, String>,
    ) -> StorageResult<BlobModel> {
        self.update_visible_blob(account, container, blob, |model| model.metadata = metadata)
    }

    async fn stage_block(&self, mut block: BlockModel) -> StorageResult<()> {
        self.lifecycle.ensure_open(STORE_NAME)?;
        let _container = self.container_guard.read();
        self.ensure_container(&block.account, &block.container)?;
        let lock_key = Self::lock_key(&block.account, &block.container, &block.blob);
        let _guard = self.blob_locks.lock(&lock_key);

        let key = Self::blob_key(&block.account, &block.container, &block.blob, "");
        if !self.blobs.contains_key(&key) {
            let mut placeholder = BlobModel::staged_placeholder(
                block.account.clone(),
                block.container.clone(),
                block.blob.clone(),
            );
            placeholder.seq = self.next_seq();
            self.replace_blob(placeholder);
        }

        block.is_committed = false;
        block.orphaned = false;
        self.replace_block(block);
        Ok(())
    }

    async fn commit_block_list(
        &self,
        mut template: BlobModel,
        refs: &[BlockLookup],
        if_match: Option<&str>,
    ) -> StorageResult<BlobModel> {
        self.lifecycle.ensure_open(STORE_NAME)?;
        let _container = self.container_guard.read();
        self.ensure_container(&template.account, &template.container)?;
        let lock_key = Self::lock_key(&template.account, &template.container, &template.name);
        let _guard = self.blob_locks.lock(&lock_key);

        let key = Self::blob_key(
            &template.account,
            &template.container,
            &template.name,
            &template.snapshot,
        );
        let previous = self.blobs.get(&key).map(|b| b.value().clone());
        let committed = previous.as_ref().filter(|b| b.is_visible());

        if let Some(expected) = if_match {
            let matched = committed
                .map(|b| expected == "*" || expected == b.properties.etag)
                .unwrap_or(false);
            if !matched {
                return Err(StorageError::new(ErrorCode::ConditionNotMet));
            }
        }

        let staged: HashMap<String, BlockModel> = self
            .block_records(&lock_key)
            .into_iter()
            .filter(|b| b.is_staged())
            .map(|b| (b.block_id.clone(), b))
            .collect();
        let committed_list = committed
            .map(|b| b.committed_blocks_in_order.as_slice())
            .unwrap_or(&[]);
        let (blocks, promoted) = resolve_block_list(refs, committed_list, &staged)?;

        template.seq = previous
            .as_ref()
            .map(|b| b.seq)
            .unwrap_or_else(|| self.next_seq());
        if let Some(committed) = committed {
            template.properties.created_on = committed.properties.created_on;
        }
        template.is_committed = true;
        template.deleted = false;
        template.persistency = None;
        template.properties.content_length = blocks.iter().map(|b| b.size).sum();
        template.committed_blocks_in_order = blocks;
        template.properties.update_etag();

        let linked: HashSet<&str> = template
            .committed_blocks_in_order
            .iter()
            .map(|b| b.name.as_str())
            .collect();
        for block_id in &promoted {
            if let Some(mut block) = self.blocks.get_mut(&Self::block_key(&lock_key, block_id)) {
                block.is_committed = true;
            }
        }
        self.orphan_blocks(&lock_key, |block| {
            !block.orphaned && block.is_committed && linked.contains(block.block_id.as_str())
        });

        self.replace_blob(template.clone());
        Ok(template)
    }

    async fn get_block_list(
        &self,
        account: &str,
        container: &str,
        blob: &str,
    ) -> StorageResult<BlockList> {
        self.lifecycle.ensure_open(STORE_NAME)?;
        self.ensure_container(account, container)?;
        let lock_key = Self::lock_key(account, container, blob);
        let _guard = self.blob_locks.lock(&lock_key);

        let model = self
            .blobs
            .get(&Self::blob_key(account, container, blob, ""))
            .filter(|b| !b.deleted)
            .map(|b| b.value().clone())
            .ok_or_else(|| StorageError::new(ErrorCode::BlobNotFound))?;

        let committed = if model.is_committed {
            model
                .committed_blocks_in_order
                .iter()
                .map(|b| BlockInfo {
                    name: b.name.clone(),
                    size: b.size,
                })
                .collect()
        } else {
            Vec::new()
        };
        let uncommitted = self
            .block_records(&lock_key)
            .into_iter()
            .filter(|b| b.is_staged())
            .map(|b| BlockInfo {
                name: b.block_id,
                size: b.size,
            })
            .collect();

        Ok(BlockList {
            committed,
            uncommitted,
        })
    }

    async fn has_extent_reference(&self, extent_id: &str) -> StorageResult<bool> {
        self.lifecycle.ensure_open(STORE_NAME)?;
        Ok(self.extent_refs.contains_key(extent_id))
    }

    async fn purge_orphaned_blocks(&self) -> StorageResult<usize> {
        self.lifecycle.ensure_open(STORE_NAME)?;
        let orphaned: Vec<BlockKey> = self
            .blocks
            .iter()
            .filter(|e| e.value().orphaned)
            .map(|e| e.key().clone())
            .collect();

        let mut purged = 0;
        for key in orphaned {
            let lock_key = (key.0.clone(), key.1.clone(), key.2.clone());
            let _guard = self.blob_locks.lock(&lock_key);
            if self.remove_block_record(&key, true).is_some() {
                purged += 1;
            }
        }
        Ok(purged)
    }
}
