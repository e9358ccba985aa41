//! Garbage collection for orphaned extents.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, info, warn};

use super::{BlobMetadataStore, ExtentMetadataStore, ExtentStore};
use crate::config::DEFAULT_LIST_PAGE_SIZE;
use crate::error::StorageResult;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Extents old enough to be examined.
    pub scanned: usize,
    pub deleted: usize,
    /// Unreferenced extents left in place: still active, or their check failed.
    pub skipped: usize,
    pub purged_blocks: usize,
    /// False when another sweep was already running.
    pub ran: bool,
}

impl GcReport {
    /// Report of a sweep that did not run because another one was in progress.
    pub fn skipped_run() -> Self {
        Self::default()
    }
}

/// Garbage collector for cleaning up orphaned extents.
///
/// An extent is reclaimed once it is older than the extent metadata store's
/// safety window and no blob or block record links it. Sweeps never overlap.
pub struct GarbageCollector {
    blobs: Arc<dyn BlobMetadataStore>,
    extent_metadata: Arc<dyn ExtentMetadataStore>,
    extents: Arc<dyn ExtentStore>,
    interval: Duration,
    page_size: u32,
    sweeping: Mutex<()>,
}

impl GarbageCollector {
    pub fn new(
        blobs: Arc<dyn BlobMetadataStore>,
        extent_metadata: Arc<dyn ExtentMetadataStore>,
        extents: Arc<dyn ExtentStore>,
        interval: Duration,
    ) -> Self {
        Self {
            blobs,
            extent_metadata,
            extents,
            interval,
            page_size: DEFAULT_LIST_PAGE_SIZE,
            sweeping: Mutex::new(()),
        }
    }

    /// Sets how many extents are fetched per listing call.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Starts the garbage collection loop.
    pub async fn run(&self) {
        let mut interval = time::interval(self.interval.max(Duration::from_millis(1)));

        loop {
            interval.tick().await;
            if let Err(e) = self.collect().await {
                warn!("Garbage collection failed: {}", e);
            }
        }
    }

    /// Performs a single garbage collection pass.
    pub async fn collect(&self) -> StorageResult<GcReport> {
        let Ok(_sweep) = self.sweeping.try_lock() else {
            debug!("Garbage collection already running, skipping");
            return Ok(GcReport::skipped_run());
        };

        debug!("Starting garbage collection");
        let mut report = GcReport {
            ran: true,
            ..GcReport::default()
        };
        report.purged_blocks = self.blobs.purge_orphaned_blocks().await?;

        let mut batches = self
            .extent_metadata
            .clone()
            .iterate_all(Some(Utc::now()), self.page_size);
        while let Some(batch) = batches.next_batch().await? {
            for extent_id in batch {
                report.scanned += 1;
                match self.blobs.has_extent_reference(&extent_id).await {
                    Ok(true) => {}
                    Ok(false) => match self.extents.delete(&extent_id).await {
                        Ok(true) => report.deleted += 1,
                        Ok(false) => report.skipped += 1,
                        Err(e) => {
                            warn!("Failed to delete extent {}: {}", extent_id, e);
                            report.skipped += 1;
                        }
                    },
                    Err(e) => {
                        warn!("Failed to check references of extent {}: {}", extent_id, e);
                        report.skipped += 1;
                    }
                }
            }
        }

        info!(
            "Garbage collection finished: scanned {}, deleted {}, skipped {}, purged {} blocks",
            report.scanned, report.deleted, report.skipped, report.purged_blocks
        );
        Ok(report)
    }
}
