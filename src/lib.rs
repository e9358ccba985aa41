//! azurite-store: the storage engine of an Azure Blob Storage emulator.
//!
//! Blob content lives in an append-only extent store; container, blob and
//! block records live in a blob metadata store that links content only through
//! extent locators. A garbage collector reclaims extents no record links.
//!
//! # Example
//!
//! ```no_run
//! use azurite_store::handlers::{create_container, download_blob, upload_block_blob};
//! use azurite_store::stream::{bytes_stream, read_to_bytes};
//! use azurite_store::{Config, RequestContext, StorageService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = StorageService::open(Config::default()).await?;
//!
//!     let ctx = RequestContext::for_container("devstoreaccount1", "photos");
//!     create_container(&ctx, service.blobs()).await?;
//!
//!     let ctx = RequestContext::for_blob("devstoreaccount1", "photos", "cat.txt");
//!     upload_block_blob(&ctx, service.blobs(), service.extents(), bytes_stream("meow")).await?;
//!
//!     let download = download_blob(&ctx, service.blobs(), service.extents()).await?;
//!     assert_eq!(read_to_bytes(download.body).await?.as_ref(), b"meow");
//!
//!     service.close().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod models;
pub mod service;
pub mod storage;
pub mod stream;

// Re-exports for convenience
pub use config::{Args, Config, StoreDestination, DEFAULT_ACCOUNT};
pub use context::{ListParams, RequestContext};
pub use error::{ErrorCode, StorageError, StorageResult};
pub use service::{StorageService, StorageServiceBuilder};
pub use storage::{
    BlobMetadataStore, ExtentMetadataStore, ExtentStore, FsExtentStore, GarbageCollector,
    GcReport, MemoryBlobMetadataStore, MemoryExtentMetadataStore, MemoryExtentStore,
};
pub use stream::PayloadStream;
