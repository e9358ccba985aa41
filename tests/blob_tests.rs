//! Blob operation tests: download, properties, metadata and deletion.

mod common;

use std::collections::HashMap;

use azurite_store::handlers;
use azurite_store::models::BlobHttpHeaders;
use azurite_store::stream::{bytes_stream, read_to_bytes};
use azurite_store::ErrorCode;
use common::{block_id, random_bytes, TestService};

#[tokio::test]
async fn test_download_blob() {
    let server = TestService::start().await;
    server.create_container("test-container").await;
    server
        .upload("test-container", "hello.txt", b"Hello, World!")
        .await;

    let response = handlers::download_blob(
        &server.blob_ctx("test-container", "hello.txt"),
        server.service.blobs(),
        server.service.extents(),
    )
    .await
    .unwrap();
    assert_eq!(response.blob.properties.content_length, 13);
    assert_eq!(
        read_to_bytes(response.body).await.unwrap().as_ref(),
        b"Hello, World!"
    );
}

#[tokio::test]
async fn test_download_large_blob_from_disk() {
    let server = TestService::on_disk_with(|config| config.max_extent_size = 256 * 1024).await;
    server.create_container("test-container").await;

    let data = random_bytes(3 * 1024 * 1024 + 11);
    server.upload("test-container", "large.bin", &data).await;
    assert_eq!(
        server.download("test-container", "large.bin").await.as_ref(),
        data.as_slice()
    );
}

#[tokio::test]
async fn test_download_committed_blocks_across_extents() {
    let server = TestService::on_disk_with(|config| config.max_extent_size = 10).await;
    server.create_container("test-container").await;

    let mut expected = Vec::new();
    let mut refs = Vec::new();
    for n in 0..5u32 {
        let payload = random_bytes(7 + n as usize);
        server
            .stage("test-container", "blocks.bin", &block_id(n), &payload)
            .await;
        expected.extend_from_slice(&payload);
        refs.push(azurite_store::models::BlockLookup::latest(block_id(n)));
    }
    handlers::commit_block_list(
        &server.blob_ctx("test-container", "blocks.bin"),
        server.service.blobs(),
        &refs,
    )
    .await
    .unwrap();

    assert_eq!(
        server.download("test-container", "blocks.bin").await.as_ref(),
        expected.as_slice()
    );
}

#[tokio::test]
async fn test_empty_blob() {
    let server = TestService::on_disk().await;
    server.create_container("test-container").await;
    server.upload("test-container", "empty", b"").await;

    let blob = handlers::get_blob_properties(
        &server.blob_ctx("test-container", "empty"),
        server.service.blobs(),
    )
    .await
    .unwrap();
    assert_eq!(blob.properties.content_length, 0);
    assert!(server.download("test-container", "empty").await.is_empty());
}

#[tokio::test]
async fn test_download_not_found() {
    let server = TestService::start().await;
    server.create_container("test-container").await;

    let ctx = server
        .blob_ctx("test-container", "missing.txt")
        .with_request_id("req-1");
    let err = handlers::download_blob(&ctx, server.service.blobs(), server.service.extents())
        .await
        .err()
        .unwrap();
    assert_eq!(err.code, ErrorCode::BlobNotFound);
    assert_eq!(err.request_id.as_deref(), Some("req-1"));

    let err = handlers::get_blob_properties(
        &server.blob_ctx("no-such-container", "missing.txt"),
        server.service.blobs(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::ContainerNotFound);
}

#[tokio::test]
async fn test_upload_stores_headers_and_metadata() {
    let server = TestService::start().await;
    server.create_container("test-container").await;

    let metadata: HashMap<String, String> = [("owner".to_string(), "alice".to_string())]
        .into_iter()
        .collect();
    let ctx = server
        .blob_ctx("test-container", "doc.json")
        .with_content_type("application/json")
        .with_http_headers(BlobHttpHeaders {
            cache_control: Some("no-cache".to_string()),
            ..Default::default()
        })
        .with_metadata(metadata.clone());
    handlers::upload_block_blob(
        &ctx,
        server.service.blobs(),
        server.service.extents(),
        bytes_stream("{}"),
    )
    .await
    .unwrap();

    let blob = handlers::get_blob_properties(
        &server.blob_ctx("test-container", "doc.json"),
        server.service.blobs(),
    )
    .await
    .unwrap();
    assert_eq!(blob.properties.content_type.as_deref(), Some("application/json"));
    assert_eq!(blob.properties.cache_control.as_deref(), Some("no-cache"));
    assert_eq!(blob.metadata, metadata);
    assert!(blob.properties.content_md5.is_some());
}

#[tokio::test]
async fn test_set_blob_http_headers() {
    let server = TestService::start().await;
    server.create_container("test-container").await;
    let uploaded = server.upload("test-container", "page.html", b"<p/>").await;

    let ctx = server
        .blob_ctx("test-container", "page.html")
        .with_http_headers(BlobHttpHeaders {
            content_type: Some("text/html".to_string()),
            content_language: Some("en".to_string()),
            ..Default::default()
        });
    let response = handlers::set_blob_http_headers(&ctx, server.service.blobs())
        .await
        .unwrap();
    assert_ne!(response.etag, uploaded.etag);

    let blob = handlers::get_blob_properties(&ctx, server.service.blobs())
        .await
        .unwrap();
    assert_eq!(blob.properties.content_type.as_deref(), Some("text/html"));
    assert_eq!(blob.properties.content_language.as_deref(), Some("en"));
    assert_eq!(blob.properties.etag, response.etag);
    assert_eq!(
        server.download("test-container", "page.html").await.as_ref(),
        b"<p/>"
    );
}

#[tokio::test]
async fn test_set_blob_metadata() {
    let server = TestService::start().await;
    server.create_container("test-container").await;
    server.upload("test-container", "blob.txt", b"data").await;

    let metadata: HashMap<String, String> = [
        ("color".to_string(), "blue".to_string()),
        ("size".to_string(), "large".to_string()),
    ]
    .into_iter()
    .collect();
    let ctx = server
        .blob_ctx("test-container", "blob.txt")
        .with_metadata(metadata.clone());
    handlers::set_blob_metadata(&ctx, server.service.blobs())
        .await
        .unwrap();

    let blob = handlers::get_blob_properties(&ctx, server.service.blobs())
        .await
        .unwrap();
    assert_eq!(blob.metadata, metadata);

    let err = handlers::set_blob_metadata(
        &server.blob_ctx("test-container", "missing.txt"),
        server.service.blobs(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::BlobNotFound);
}

#[tokio::test]
async fn test_delete_blob() {
    let server = TestService::start().await;
    server.create_container("test-container").await;
    server.upload("test-container", "to-delete.txt", b"bye").await;

    let ctx = server.blob_ctx("test-container", "to-delete.txt");
    handlers::delete_blob(&ctx, server.service.blobs())
        .await
        .unwrap();

    let err = handlers::get_blob_properties(&ctx, server.service.blobs())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::BlobNotFound);

    let err = handlers::delete_blob(&ctx, server.service.blobs())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::BlobNotFound);
}

#[tokio::test]
async fn test_delete_staged_only_blob_is_not_found() {
    let server = TestService::start().await;
    server.create_container("test-container").await;
    server
        .stage("test-container", "pending.txt", &block_id(1), b"x")
        .await;

    let err = handlers::delete_blob(
        &server.blob_ctx("test-container", "pending.txt"),
        server.service.blobs(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::BlobNotFound);
}

#[tokio::test]
async fn test_reupload_after_delete() {
    let server = TestService::start().await;
    server.create_container("test-container").await;
    server.upload("test-container", "blob.txt", b"first").await;

    handlers::delete_blob(
        &server.blob_ctx("test-container", "blob.txt"),
        server.service.blobs(),
    )
    .await
    .unwrap();
    server.upload("test-container", "blob.txt", b"second").await;

    assert_eq!(
        server.download("test-container", "blob.txt").await.as_ref(),
        b"second"
    );
}

#[tokio::test]
async fn test_missing_blob_name() {
    let server = TestService::start().await;
    server.create_container("test-container").await;

    let err = handlers::get_blob_properties(
        &server.container_ctx("test-container"),
        server.service.blobs(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidResourceName);
}

#[tokio::test]
async fn test_snapshot_is_distinct_from_base_blob() {
    let server = TestService::start().await;
    server.create_container("test-container").await;
    server.upload("test-container", "blob.txt", b"base").await;

    let ctx = server
        .blob_ctx("test-container", "blob.txt")
        .with_snapshot("2024-01-01T00:00:00.0000000Z");
    let err = handlers::get_blob_properties(&ctx, server.service.blobs())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::BlobNotFound);
    let err = handlers::delete_blob(&ctx, server.service.blobs())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::BlobNotFound);

    assert_eq!(
        server.download("test-container", "blob.txt").await.as_ref(),
        b"base"
    );
}
