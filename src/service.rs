//! Storage service: wires the stores together and runs background work.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::StorageResult;
use crate::storage::{
    BlobMetadataStore, ExtentMetadataStore, ExtentStore, FsExtentStore, GarbageCollector,
    MemoryBlobMetadataStore, MemoryExtentMetadataStore, MemoryExtentStore,
};

/// Opened stores plus the garbage collector that reconciles them.
pub struct StorageService {
    config: Arc<Config>,
    blobs: Arc<dyn BlobMetadataStore>,
    extent_metadata: Arc<dyn ExtentMetadataStore>,
    extents: Arc<dyn ExtentStore>,
    gc: Arc<GarbageCollector>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StorageService {
    /// Opens a service with the stores `config` describes.
    pub async fn open(config: Config) -> StorageResult<Self> {
        StorageServiceBuilder::new(config).build().await
    }

    pub fn builder(config: Config) -> StorageServiceBuilder {
        StorageServiceBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn blobs(&self) -> Arc<dyn BlobMetadataStore> {
        self.blobs.clone()
    }

    pub fn extent_metadata(&self) -> Arc<dyn ExtentMetadataStore> {
        self.extent_metadata.clone()
    }

    pub fn extents(&self) -> Arc<dyn ExtentStore> {
        self.extents.clone()
    }

    pub fn gc(&self) -> Arc<GarbageCollector> {
        self.gc.clone()
    }

    /// Starts the GC loop and, for persistent stores, the autosave loop.
    pub fn spawn_background_tasks(&self) {
        let mut tasks = self.tasks.lock();

        let gc = self.gc.clone();
        tasks.push(tokio::spawn(async move { gc.run().await }));

        if self.config.blob_db_path().is_some() {
            let blobs = self.blobs.clone();
            let extent_metadata = self.extent_metadata.clone();
            let every = self.config.autosave_interval.max(Duration::from_millis(1));
            tasks.push(tokio::spawn(async move {
                let mut interval = time::interval(every);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if let Err(e) = blobs.flush().await {
                        warn!("Failed to save blob metadata: {}", e);
                    }
                    if let Err(e) = extent_metadata.flush().await {
                        warn!("Failed to save extent metadata: {}", e);
                    }
                }
            }));
        }
    }

    /// Stops background work and closes both metadata stores.
    pub async fn close(&self) -> StorageResult<()> {
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }

        let blobs = self.blobs.close().await;
        let extent_metadata = self.extent_metadata.close().await;
        info!("Storage service closed");
        blobs.and(extent_metadata)
    }
}

/// Builder for [`StorageService`] with optional custom stores.
pub struct StorageServiceBuilder {
    config: Config,
    blobs: Option<Arc<dyn BlobMetadataStore>>,
    extent_metadata: Option<Arc<dyn ExtentMetadataStore>>,
    extents: Option<Arc<dyn ExtentStore>>,
}

impl StorageServiceBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            blobs: None,
            extent_metadata: None,
            extents: None,
        }
    }

    pub fn blob_metadata(mut self, store: Arc<dyn BlobMetadataStore>) -> Self {
        self.blobs = Some(store);
        self
    }

    pub fn extent_metadata(mut self, store: Arc<dyn ExtentMetadataStore>) -> Self {
        self.extent_metadata = Some(store);
        self
    }

    /// Uses `store` for extent bytes. It must record its extents in the
    /// extent metadata store given to this builder.
    pub fn extent_store(mut self, store: Arc<dyn ExtentStore>) -> Self {
        self.extents = Some(store);
        self
    }

    pub async fn build(self) -> StorageResult<StorageService> {
        let config = self.config;
        config.validate()?;

        let extent_metadata: Arc<dyn ExtentMetadataStore> = match self.extent_metadata {
            Some(store) => store,
            None => {
                let mut store =
                    MemoryExtentMetadataStore::new().with_safety_window(config.safety_window);
                if let Some(path) = config.extent_db_path() {
                    store = store.with_path(path);
                }
                Arc::new(store)
            }
        };
        let blobs: Arc<dyn BlobMetadataStore> = match self.blobs {
            Some(store) => store,
            None => {
                let mut store = MemoryBlobMetadataStore::new();
                if let Some(path) = config.blob_db_path() {
                    store = store.with_path(path);
                }
                Arc::new(store)
            }
        };

        if !extent_metadata.is_initialized() {
            extent_metadata.init().await?;
        }
        if !blobs.is_initialized() {
            blobs.init().await?;
        }

        let extents: Arc<dyn ExtentStore> = match self.extents {
            Some(store) => store,
            None if config.in_memory => Arc::new(MemoryExtentStore::new(extent_metadata.clone())),
            None => Arc::new(
                FsExtentStore::new(
                    &config.destinations,
                    config.max_extent_size,
                    extent_metadata.clone(),
                )
                .await?,
            ),
        };

        let gc = GarbageCollector::new(
            blobs.clone(),
            extent_metadata.clone(),
            extents.clone(),
            config.gc_interval,
        )
        .with_page_size(config.gc_page_size);

        match &config.location {
            Some(location) if !config.in_memory => info!(
                "Storage service opened at {} with {} extent destinations",
                location.display(),
                config.destinations.len()
            ),
            _ => info!("Storage service opened in memory"),
        }

        Ok(StorageService {
            config: Arc::new(config),
            blobs,
            extent_metadata,
            extents,
            gc: Arc::new(gc),
            tasks: Mutex::new(Vec::new()),
        })
    }
}
