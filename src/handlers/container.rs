//! Container-level handlers.

use std::sync::Arc;

use crate::context::{ListParams, RequestContext};
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::{BlobModel, ContainerModel};
use crate::storage::BlobMetadataStore;

use super::{in_request, ContainerResponse, ListResponse};

/// PUT /{container}?restype=container - Create container.
pub async fn create_container(
    ctx: &RequestContext,
    metadata: Arc<dyn BlobMetadataStore>,
) -> StorageResult<ContainerResponse> {
    in_request(ctx, async {
        let container_name = ctx.container_name()?;
        validate_container_name(container_name)?;

        let mut container = ContainerModel::new(ctx.account.clone(), container_name.to_string());
        container.metadata = ctx.metadata.clone();

        let container = metadata.create_container(container).await?;
        Ok::<_, StorageError>(ContainerResponse::new(ctx, &container))
    })
    .await
}

/// GET /{container}?restype=container - Get container properties.
pub async fn get_container_properties(
    ctx: &RequestContext,
    metadata: Arc<dyn BlobMetadataStore>,
) -> StorageResult<ContainerModel> {
    in_request(ctx, async {
        let container_name = ctx.container_name()?;
        metadata
            .get_container_properties(&ctx.account, container_name)
            .await
    })
    .await
}

/// PUT /{container}?restype=container&comp=metadata - Set container metadata.
pub async fn set_container_metadata(
    ctx: &RequestContext,
    metadata: Arc<dyn BlobMetadataStore>,
) -> StorageResult<ContainerResponse> {
    in_request(ctx, async {
        let container_name = ctx.container_name()?;
        let container = metadata
            .set_container_metadata(&ctx.account, container_name, ctx.metadata.clone())
            .await?;
        Ok::<_, StorageError>(ContainerResponse::new(ctx, &container))
    })
    .await
}

/// DELETE /{container}?restype=container - Delete container.
pub async fn delete_container(
    ctx: &RequestContext,
    metadata: Arc<dyn BlobMetadataStore>,
) -> StorageResult<()> {
    in_request(ctx, async {
        let container_name = ctx.container_name()?;
        metadata.delete_container(&ctx.account, container_name).await
    })
    .await
}

/// GET /?comp=list - List containers.
pub async fn list_containers(
    ctx: &RequestContext,
    metadata: Arc<dyn BlobMetadataStore>,
    params: &ListParams,
) -> StorageResult<ListResponse<ContainerModel>> {
    in_request(ctx, async {
        let (items, next_marker) = metadata
            .list_containers(
                &ctx.account,
                params.prefix.as_deref(),
                params.max_results,
                params.marker()?,
            )
            .await?;
        Ok::<_, StorageError>(ListResponse {
            items,
            next_marker: next_marker.map(|m| m.to_string()),
        })
    })
    .await
}

/// GET /{container}?restype=container&comp=list - List blobs.
pub async fn list_blobs(
    ctx: &RequestContext,
    metadata: Arc<dyn BlobMetadataStore>,
    params: &ListParams,
) -> StorageResult<ListResponse<BlobModel>> {
    in_request(ctx, async {
        let container_name = ctx.container_name()?;
        let (items, next_marker) = metadata
            .list_blobs(
                &ctx.account,
                container_name,
                params.prefix.as_deref(),
                params.max_results,
                params.marker()?,
            )
            .await?;
        Ok::<_, StorageError>(ListResponse {
            items,
            next_marker: next_marker.map(|m| m.to_string()),
        })
    })
    .await
}

/// Validates a container name.
fn validate_container_name(name: &str) -> StorageResult<()> {
    // $root, $logs and $web are reserved system containers
    if matches!(name, "$root" | "$logs" | "$web") {
        return Ok(());
    }

    if name.len() < 3 || name.len() > 63 {
        return Err(StorageError::with_message(
            ErrorCode::InvalidResourceName,
            "Container name must be between 3 and 63 characters",
        ));
    }

    if !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return Err(StorageError::with_message(
            ErrorCode::InvalidResourceName,
            "Container name must start with a letter or number",
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(StorageError::with_message(
            ErrorCode::InvalidResourceName,
            "Container name can only contain lowercase letters, numbers, and hyphens",
        ));
    }

    if name.contains("--") || name.ends_with('-') {
        return Err(StorageError::with_message(
            ErrorCode::InvalidResourceName,
            "Container name cannot have consecutive or trailing hyphens",
        ));
    }

    Ok(())
}
