//! Request handlers for the blob engine.
//!
//! Handlers take a resolved [`RequestContext`] plus the stores they need and
//! return plain response records; rendering them on the wire is left to the
//! transport layer.

mod blob;
mod block_blob;
mod container;

pub use blob::*;
pub use block_blob::*;
pub use container::*;

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use md5::{Digest, Md5};
use std::future::Future;

use crate::context::RequestContext;
use crate::error::StorageResult;
use crate::models::{BlobModel, ContainerModel};
use crate::stream::PayloadStream;

/// Result of a write to a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobResponse {
    pub request_id: String,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    /// MD5 of the stored content, when known.
    pub content_md5: Option<Vec<u8>>,
    pub server_encrypted: bool,
}

impl BlobResponse {
    fn new(ctx: &RequestContext, blob: &BlobModel) -> Self {
        Self {
            request_id: ctx.request_id.clone(),
            etag: blob.properties.etag.clone(),
            last_modified: blob.properties.last_modified,
            content_md5: blob.properties.content_md5.clone(),
            server_encrypted: blob.properties.server_encrypted,
        }
    }
}

/// Result of a write to a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerResponse {
    pub request_id: String,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

impl ContainerResponse {
    fn new(ctx: &RequestContext, container: &ContainerModel) -> Self {
        Self {
            request_id: ctx.request_id.clone(),
            etag: container.properties.etag.clone(),
            last_modified: container.properties.last_modified,
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    /// Token for the next page; absent when the page was short.
    pub next_marker: Option<String>,
}

/// Computes the MD5 digest of a payload stream.
pub async fn compute_md5(mut data: PayloadStream) -> StorageResult<Vec<u8>> {
    let mut hasher = Md5::new();
    while let Some(chunk) = data.try_next().await? {
        hasher.update(&chunk);
    }
    Ok(hasher.finalize().to_vec())
}

/// Runs a handler body, tagging any error with the request id.
async fn in_request<T>(
    ctx: &RequestContext,
    handler: impl Future<Output = StorageResult<T>>,
) -> StorageResult<T> {
    handler
        .await
        .map_err(|e| e.with_request_id(ctx.request_id.as_str()))
}
