//! Block blob handlers: single-shot upload, staging and commit.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::sync::Arc;
use tracing::debug;

use crate::context::RequestContext;
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::{
    BlobModel, BlobProperties, BlockList, BlockListType, BlockLookup, BlockModel, Locator,
};
use crate::storage::{BlobMetadataStore, ExtentStore};
use crate::stream::PayloadStream;

use super::{compute_md5, in_request, BlobResponse};

/// Result of staging a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageBlockResponse {
    pub request_id: String,
    pub content_md5: Vec<u8>,
}

/// Fails unless `locator` holds exactly the declared number of bytes.
fn check_content_length(ctx: &RequestContext, locator: &Locator) -> StorageResult<()> {
    match ctx.content_length {
        Some(declared) if declared != locator.count => Err(StorageError::with_message(
            ErrorCode::ContentLengthMismatch,
            format!(
                "Declared content length {} but received {} bytes",
                declared, locator.count
            ),
        )),
        _ => Ok(()),
    }
}

/// Reads the stored range back and checks it against the caller's MD5.
async fn verify_md5(
    ctx: &RequestContext,
    extents: &Arc<dyn ExtentStore>,
    locator: &Locator,
) -> StorageResult<Vec<u8>> {
    let computed = compute_md5(extents.read(locator).await?).await?;
    if let Some(expected) = &ctx.content_md5 {
        if expected != &computed {
            return Err(StorageError::new(ErrorCode::Md5Mismatch));
        }
    }
    Ok(computed)
}

/// Copies the caller's blob headers, falling back to the request body's
/// content type.
fn apply_http_headers(properties: &mut BlobProperties, ctx: &RequestContext) {
    let default_type = properties.content_type.take();
    properties.set_http_headers(&ctx.http_headers);
    if properties.content_type.is_none() {
        properties.content_type = ctx.content_type.clone().or(default_type);
    }
}

fn validate_block_id(block_id: &str) -> StorageResult<()> {
    let decoded = BASE64.decode(block_id).map_err(|_| {
        StorageError::with_message(ErrorCode::InvalidBlockId, "Block ID must be base64 encoded")
    })?;
    if decoded.len() > 64 {
        return Err(StorageError::with_message(
            ErrorCode::InvalidBlockId,
            "Block ID must be <= 64 bytes when decoded",
        ));
    }
    Ok(())
}

/// PUT /{container}/{blob} - Upload block blob (single PUT).
///
/// Bytes are appended first and linked only after the length and checksum
/// checks pass; a rejected upload leaves any previous blob untouched.
pub async fn upload_block_blob(
    ctx: &RequestContext,
    metadata: Arc<dyn BlobMetadataStore>,
    extents: Arc<dyn ExtentStore>,
    body: PayloadStream,
) -> StorageResult<BlobResponse> {
    in_request(ctx, async {
        let container = ctx.container_name()?;
        let blob_name = ctx.blob_name()?;
        metadata
            .get_container_properties(&ctx.account, container)
            .await?;

        let locator = extents.append(body).await?;
        check_content_length(ctx, &locator)?;
        let content_md5 = verify_md5(ctx, &extents, &locator).await?;

        let mut blob = BlobModel::new(
            ctx.account.clone(),
            container.to_string(),
            blob_name.to_string(),
            locator.count,
        );
        apply_http_headers(&mut blob.properties, ctx);
        if blob.properties.content_md5.is_none() {
            blob.properties.content_md5 = Some(content_md5);
        }
        blob.metadata = ctx.metadata.clone();
        blob.persistency = Some(locator);

        let blob = metadata.put_blob(blob).await?;
        debug!(
            "Uploaded {}/{}/{} ({} bytes)",
            ctx.account, container, blob_name, blob.properties.content_length
        );
        Ok::<_, StorageError>(BlobResponse::new(ctx, &blob))
    })
    .await
}

/// PUT /{container}/{blob}?comp=block&blockid={id} - Stage block.
pub async fn stage_block(
    ctx: &RequestContext,
    block_id: &str,
    metadata: Arc<dyn BlobMetadataStore>,
    extents: Arc<dyn ExtentStore>,
    body: PayloadStream,
) -> StorageResult<StageBlockResponse> {
    in_request(ctx, async {
        let container = ctx.container_name()?;
        let blob_name = ctx.blob_name()?;
        validate_block_id(block_id)?;
        metadata
            .get_container_properties(&ctx.account, container)
            .await?;

        let locator = extents.append(body).await?;
        check_content_length(ctx, &locator)?;
        let content_md5 = verify_md5(ctx, &extents, &locator).await?;

        let block = BlockModel::new(
            ctx.account.clone(),
            container.to_string(),
            blob_name.to_string(),
            block_id.to_string(),
            locator.count,
            locator,
        );
        metadata.stage_block(block).await?;

        Ok::<_, StorageError>(StageBlockResponse {
            request_id: ctx.request_id.clone(),
            content_md5,
        })
    })
    .await
}

/// PUT /{container}/{blob}?comp=block&blockid={id} with x-ms-copy-source.
pub async fn stage_block_from_url(
    ctx: &RequestContext,
    _block_id: &str,
    _source_url: &str,
) -> StorageResult<StageBlockResponse> {
    Err(StorageError::with_message(
        ErrorCode::NotImplemented,
        "Staging a block from a URL is not supported",
    )
    .with_request_id(ctx.request_id.as_str()))
}

/// PUT /{container}/{blob}?comp=blocklist - Commit block list.
pub async fn commit_block_list(
    ctx: &RequestContext,
    metadata: Arc<dyn BlobMetadataStore>,
    refs: &[BlockLookup],
) -> StorageResult<BlobResponse> {
    in_request(ctx, async {
        let container = ctx.container_name()?;
        let blob_name = ctx.blob_name()?;

        let mut template =
            BlobModel::new(ctx.account.clone(), container.to_string(), blob_name.to_string(), 0);
        apply_http_headers(&mut template.properties, ctx);
        template.metadata = ctx.metadata.clone();

        let blob = metadata
            .commit_block_list(template, refs, ctx.if_match.as_deref())
            .await?;
        debug!(
            "Committed {} blocks to {}/{}/{}",
            blob.committed_blocks_in_order.len(),
            ctx.account,
            container,
            blob_name
        );
        Ok::<_, StorageError>(BlobResponse::new(ctx, &blob))
    })
    .await
}

/// GET /{container}/{blob}?comp=blocklist - Get block list.
pub async fn get_block_list(
    ctx: &RequestContext,
    metadata: Arc<dyn BlobMetadataStore>,
    list_type: BlockListType,
) -> StorageResult<BlockList> {
    in_request(ctx, async {
        let container = ctx.container_name()?;
        let blob_name = ctx.blob_name()?;

        let mut list = metadata
            .get_block_list(&ctx.account, container, blob_name)
            .await?;
        match list_type {
            BlockListType::Committed => list.uncommitted.clear(),
            BlockListType::Uncommitted => list.committed.clear(),
            BlockListType::All => {}
        }
        Ok::<_, StorageError>(list)
    })
    .await
}
