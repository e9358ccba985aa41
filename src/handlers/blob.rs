//! Blob-level handlers: download, properties, metadata and deletion.

use futures::stream::{self, StreamExt, TryStreamExt};
use std::io;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::{StorageError, StorageResult};
use crate::models::BlobModel;
use crate::storage::{BlobMetadataStore, ExtentStore};
use crate::stream::PayloadStream;

use super::{in_request, BlobResponse};

/// Blob record plus a stream of its content.
pub struct DownloadResponse {
    pub request_id: String,
    pub blob: BlobModel,
    pub body: PayloadStream,
}

/// GET /{container}/{blob} - Download blob.
///
/// The body reads the blob's extent ranges lazily, one after the other.
pub async fn download_blob(
    ctx: &RequestContext,
    metadata: Arc<dyn BlobMetadataStore>,
    extents: Arc<dyn ExtentStore>,
) -> StorageResult<DownloadResponse> {
    in_request(ctx, async {
        let container = ctx.container_name()?;
        let blob_name = ctx.blob_name()?;
        let blob = metadata
            .get_blob_properties(&ctx.account, container, blob_name, &ctx.snapshot)
            .await?;

        let body = stream::iter(blob.content_locators())
            .then(move |locator| {
                let extents = extents.clone();
                async move { extents.read(&locator).await }
            })
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
            .try_flatten()
            .boxed();

        Ok::<_, StorageError>(DownloadResponse {
            request_id: ctx.request_id.clone(),
            blob,
            body,
        })
    })
    .await
}

/// HEAD /{container}/{blob} - Get blob properties.
pub async fn get_blob_properties(
    ctx: &RequestContext,
    metadata: Arc<dyn BlobMetadataStore>,
) -> StorageResult<BlobModel> {
    in_request(ctx, async {
        let container = ctx.container_name()?;
        let blob_name = ctx.blob_name()?;
        metadata
            .get_blob_properties(&ctx.account, container, blob_name, &ctx.snapshot)
            .await
    })
    .await
}

/// DELETE /{container}/{blob} - Delete blob.
///
/// Content bytes are left for the garbage collector.
pub async fn delete_blob(
    ctx: &RequestContext,
    metadata: Arc<dyn BlobMetadataStore>,
) -> StorageResult<()> {
    in_request(ctx, async {
        let container = ctx.container_name()?;
        let blob_name = ctx.blob_name()?;
        metadata
            .delete_blob(&ctx.account, container, blob_name, &ctx.snapshot)
            .await
    })
    .await
}

/// PUT /{container}/{blob}?comp=properties - Set blob HTTP headers.
pub async fn set_blob_http_headers(
    ctx: &RequestContext,
    metadata: Arc<dyn BlobMetadataStore>,
) -> StorageResult<BlobResponse> {
    in_request(ctx, async {
        let container = ctx.container_name()?;
        let blob_name = ctx.blob_name()?;
        let blob = metadata
            .set_blob_http_headers(&ctx.account, container, blob_name, &ctx.http_headers)
            .await?;
        Ok::<_, StorageError>(BlobResponse::new(ctx, &blob))
    })
    .await
}

/// PUT /{container}/{blob}?comp=metadata - Set blob metadata.
pub async fn set_blob_metadata(
    ctx: &RequestContext,
    metadata: Arc<dyn BlobMetadataStore>,
) -> StorageResult<BlobResponse> {
    in_request(ctx, async {
        let container = ctx.container_name()?;
        let blob_name = ctx.blob_name()?;
        let blob = metadata
            .set_blob_metadata(&ctx.account, container, blob_name, ctx.metadata.clone())
            .await?;
        Ok::<_, StorageError>(BlobResponse::new(ctx, &blob))
    })
    .await
}
