//! Block blob tests: single-shot uploads, staging and commits.

mod common;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use md5::{Digest, Md5};
use std::sync::Arc;

use azurite_store::handlers::{self, BlobResponse};
use azurite_store::models::{BlockInfo, BlockListKind, BlockListType, BlockLookup};
use azurite_store::stream::{bytes_stream, chunked_stream};
use azurite_store::{BlobMetadataStore, ErrorCode, ExtentMetadataStore, StorageResult};
use common::{block_id, let_extents_age, random_bytes, TestService};

async fn commit(
    server: &TestService,
    container: &str,
    blob: &str,
    refs: &[BlockLookup],
) -> StorageResult<BlobResponse> {
    handlers::commit_block_list(
        &server.blob_ctx(container, blob),
        server.service.blobs(),
        refs,
    )
    .await
}

fn latest(ids: &[&String]) -> Vec<BlockLookup> {
    ids.iter().map(|id| BlockLookup::latest(id.as_str())).collect()
}

fn names(blocks: &[BlockInfo]) -> Vec<&str> {
    blocks.iter().map(|b| b.name.as_str()).collect()
}

#[tokio::test]
async fn test_upload_and_download() {
    let server = TestService::start().await;
    server.create_container("test-container").await;

    let data = random_bytes(10_000);
    let response = server.upload("test-container", "blob.bin", &data).await;

    let expected_md5 = Md5::digest(&data).to_vec();
    assert_eq!(response.content_md5, Some(expected_md5));
    assert!(response.etag.starts_with('"'));
    assert_eq!(
        server.download("test-container", "blob.bin").await.as_ref(),
        data.as_slice()
    );
}

#[tokio::test]
async fn test_upload_with_matching_md5() {
    let server = TestService::start().await;
    server.create_container("test-container").await;

    let data = b"checksummed".to_vec();
    let md5 = BASE64.encode(Md5::digest(&data));
    let ctx = server
        .blob_ctx("test-container", "blob.txt")
        .with_content_length(data.len() as u64)
        .with_content_md5_base64(&md5)
        .unwrap();

    let response = handlers::upload_block_blob(
        &ctx,
        server.service.blobs(),
        server.service.extents(),
        bytes_stream(data.clone()),
    )
    .await
    .unwrap();
    assert_eq!(response.content_md5, Some(Md5::digest(&data).to_vec()));
}

#[tokio::test]
async fn test_upload_md5_mismatch_keeps_previous_blob() {
    let server = TestService::start().await;
    server.create_container("test-container").await;
    let original = server.upload("test-container", "blob.txt", b"original").await;

    let ctx = server
        .blob_ctx("test-container", "blob.txt")
        .with_content_md5(Md5::digest(b"something else").to_vec());
    let err = handlers::upload_block_blob(
        &ctx,
        server.service.blobs(),
        server.service.extents(),
        bytes_stream("replacement"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::Md5Mismatch);
    assert_eq!(err.request_id.as_deref(), Some(ctx.request_id.as_str()));

    let blob = handlers::get_blob_properties(
        &server.blob_ctx("test-container", "blob.txt"),
        server.service.blobs(),
    )
    .await
    .unwrap();
    assert_eq!(blob.properties.etag, original.etag);
    assert_eq!(
        server.download("test-container", "blob.txt").await.as_ref(),
        b"original"
    );
}

#[tokio::test]
async fn test_upload_length_mismatch_creates_nothing() {
    let server = TestService::start().await;
    server.create_container("test-container").await;

    let ctx = server
        .blob_ctx("test-container", "short.txt")
        .with_content_length(100);
    let err = handlers::upload_block_blob(
        &ctx,
        server.service.blobs(),
        server.service.extents(),
        bytes_stream("only a few bytes"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::ContentLengthMismatch);

    let err = handlers::get_blob_properties(
        &server.blob_ctx("test-container", "short.txt"),
        server.service.blobs(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::BlobNotFound);
}

#[tokio::test]
async fn test_upload_to_missing_container() {
    let server = TestService::start().await;

    let err = handlers::upload_block_blob(
        &server.blob_ctx("no-such-container", "blob.txt"),
        server.service.blobs(),
        server.service.extents(),
        bytes_stream("data"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::ContainerNotFound);
}

#[tokio::test]
async fn test_commit_preserves_caller_order() {
    let server = TestService::start().await;
    server.create_container("test-container").await;

    let (a, b, c) = (block_id(1), block_id(2), block_id(3));
    server.stage("test-container", "blob.txt", &a, b"AAAA").await;
    server.stage("test-container", "blob.txt", &b, b"BB").await;
    server.stage("test-container", "blob.txt", &c, b"CCCCCC").await;

    commit(&server, "test-container", "blob.txt", &latest(&[&b, &a, &c]))
        .await
        .unwrap();

    let blob = handlers::get_blob_properties(
        &server.blob_ctx("test-container", "blob.txt"),
        server.service.blobs(),
    )
    .await
    .unwrap();
    let order: Vec<&str> = blob
        .committed_blocks_in_order
        .iter()
        .map(|block| block.name.as_str())
        .collect();
    assert_eq!(order, vec![b.as_str(), a.as_str(), c.as_str()]);
    assert_eq!(blob.properties.content_length, 2 + 4 + 6);
    assert_eq!(
        server.download("test-container", "blob.txt").await.as_ref(),
        b"BBAAAACCCCCC"
    );
}

#[tokio::test]
async fn test_commit_same_block_twice() {
    let server = TestService::start().await;
    server.create_container("test-container").await;

    let a = block_id(1);
    server.stage("test-container", "blob.txt", &a, b"ab").await;
    commit(&server, "test-container", "blob.txt", &latest(&[&a, &a]))
        .await
        .unwrap();

    assert_eq!(
        server.download("test-container", "blob.txt").await.as_ref(),
        b"abab"
    );
}

#[tokio::test]
async fn test_commit_unknown_block_changes_nothing() {
    let server = TestService::start().await;
    server.create_container("test-container").await;

    let (a, b) = (block_id(1), block_id(2));
    server.stage("test-container", "blob.txt", &a, b"first").await;
    let committed = commit(&server, "test-container", "blob.txt", &latest(&[&a]))
        .await
        .unwrap();

    server.stage("test-container", "blob.txt", &b, b"second").await;
    let missing = block_id(99);
    let err = commit(
        &server,
        "test-container",
        "blob.txt",
        &latest(&[&b, &missing]),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidBlockList);

    let blob = handlers::get_blob_properties(
        &server.blob_ctx("test-container", "blob.txt"),
        server.service.blobs(),
    )
    .await
    .unwrap();
    assert_eq!(blob.properties.etag, committed.etag);
    assert_eq!(blob.committed_blocks_in_order.len(), 1);
    assert_eq!(blob.committed_blocks_in_order[0].name, a);

    // The staged block survives the failed commit.
    let list = handlers::get_block_list(
        &server.blob_ctx("test-container", "blob.txt"),
        server.service.blobs(),
        BlockListType::Uncommitted,
    )
    .await
    .unwrap();
    assert_eq!(names(&list.uncommitted), vec![b.as_str()]);
}

#[tokio::test]
async fn test_commit_kinds() {
    let server = TestService::start().await;
    server.create_container("test-container").await;

    let (a, b) = (block_id(1), block_id(2));
    server.stage("test-container", "blob.txt", &a, b"old-a").await;
    commit(&server, "test-container", "blob.txt", &latest(&[&a]))
        .await
        .unwrap();

    // Uncommitted does not fall back to the committed list.
    let err = commit(
        &server,
        "test-container",
        "blob.txt",
        &[BlockLookup::new(a.as_str(), BlockListKind::Uncommitted)],
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidBlockList);

    // Committed only looks at the current committed list.
    server.stage("test-container", "blob.txt", &b, b"new-b").await;
    let err = commit(
        &server,
        "test-container",
        "blob.txt",
        &[BlockLookup::new(b.as_str(), BlockListKind::Committed)],
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidBlockList);

    commit(
        &server,
        "test-container",
        "blob.txt",
        &[
            BlockLookup::new(a.as_str(), BlockListKind::Committed),
            BlockLookup::new(b.as_str(), BlockListKind::Uncommitted),
        ],
    )
    .await
    .unwrap();
    assert_eq!(
        server.download("test-container", "blob.txt").await.as_ref(),
        b"old-anew-b"
    );
}

#[tokio::test]
async fn test_latest_prefers_staged_block() {
    let server = TestService::start().await;
    server.create_container("test-container").await;

    let a = block_id(1);
    server.stage("test-container", "blob.txt", &a, b"v1").await;
    commit(&server, "test-container", "blob.txt", &latest(&[&a]))
        .await
        .unwrap();

    server.stage("test-container", "blob.txt", &a, b"v2").await;
    commit(&server, "test-container", "blob.txt", &latest(&[&a]))
        .await
        .unwrap();
    assert_eq!(
        server.download("test-container", "blob.txt").await.as_ref(),
        b"v2"
    );

    // Nothing staged any more: Latest falls back to the committed block.
    commit(&server, "test-container", "blob.txt", &latest(&[&a, &a]))
        .await
        .unwrap();
    assert_eq!(
        server.download("test-container", "blob.txt").await.as_ref(),
        b"v2v2"
    );
}

#[tokio::test]
async fn test_restage_last_write_wins() {
    let server = TestService::start().await;
    server.create_container("test-container").await;

    let a = block_id(1);
    server.stage("test-container", "blob.txt", &a, b"first").await;
    server.stage("test-container", "blob.txt", &a, b"second!").await;

    let list = handlers::get_block_list(
        &server.blob_ctx("test-container", "blob.txt"),
        server.service.blobs(),
        BlockListType::All,
    )
    .await
    .unwrap();
    assert_eq!(list.uncommitted.len(), 1);
    assert_eq!(list.uncommitted[0].size, 7);

    commit(&server, "test-container", "blob.txt", &latest(&[&a]))
        .await
        .unwrap();
    assert_eq!(
        server.download("test-container", "blob.txt").await.as_ref(),
        b"second!"
    );
}

#[tokio::test]
async fn test_staged_only_blob_is_invisible() {
    let server = TestService::start().await;
    server.create_container("test-container").await;
    server
        .stage("test-container", "pending.txt", &block_id(1), b"data")
        .await;

    let err = handlers::get_blob_properties(
        &server.blob_ctx("test-container", "pending.txt"),
        server.service.blobs(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::BlobNotFound);

    let page = handlers::list_blobs(
        &server.container_ctx("test-container"),
        server.service.blobs(),
        &Default::default(),
    )
    .await
    .unwrap();
    assert!(page.items.is_empty());

    let list = handlers::get_block_list(
        &server.blob_ctx("test-container", "pending.txt"),
        server.service.blobs(),
        BlockListType::All,
    )
    .await
    .unwrap();
    assert!(list.committed.is_empty());
    assert_eq!(names(&list.uncommitted), vec![block_id(1).as_str()]);
}

#[tokio::test]
async fn test_commit_discards_unused_staged_blocks() {
    let server = TestService::start().await;
    server.create_container("test-container").await;

    let (a, b) = (block_id(1), block_id(2));
    server.stage("test-container", "blob.txt", &a, b"a").await;
    server.stage("test-container", "blob.txt", &b, b"b").await;
    commit(&server, "test-container", "blob.txt", &latest(&[&a]))
        .await
        .unwrap();

    let list = handlers::get_block_list(
        &server.blob_ctx("test-container", "blob.txt"),
        server.service.blobs(),
        BlockListType::All,
    )
    .await
    .unwrap();
    assert_eq!(names(&list.committed), vec![a.as_str()]);
    assert!(list.uncommitted.is_empty());

    let err = commit(&server, "test-container", "blob.txt", &latest(&[&b]))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidBlockList);
}

#[tokio::test]
async fn test_get_block_list_types() {
    let server = TestService::start().await;
    server.create_container("test-container").await;

    let (a, b) = (block_id(1), block_id(2));
    server.stage("test-container", "blob.txt", &a, b"aaa").await;
    commit(&server, "test-container", "blob.txt", &latest(&[&a]))
        .await
        .unwrap();
    server.stage("test-container", "blob.txt", &b, b"bb").await;

    let ctx = server.blob_ctx("test-container", "blob.txt");
    let committed =
        handlers::get_block_list(&ctx, server.service.blobs(), BlockListType::Committed)
            .await
            .unwrap();
    assert_eq!(
        committed.committed,
        vec![BlockInfo {
            name: a.clone(),
            size: 3
        }]
    );
    assert!(committed.uncommitted.is_empty());

    let uncommitted =
        handlers::get_block_list(&ctx, server.service.blobs(), BlockListType::Uncommitted)
            .await
            .unwrap();
    assert!(uncommitted.committed.is_empty());
    assert_eq!(names(&uncommitted.uncommitted), vec![b.as_str()]);

    let all = handlers::get_block_list(&ctx, server.service.blobs(), BlockListType::All)
        .await
        .unwrap();
    assert_eq!(all.committed.len(), 1);
    assert_eq!(all.uncommitted.len(), 1);
}

#[tokio::test]
async fn test_get_block_list_missing_blob() {
    let server = TestService::start().await;
    server.create_container("test-container").await;

    let err = handlers::get_block_list(
        &server.blob_ctx("test-container", "nothing.txt"),
        server.service.blobs(),
        BlockListType::All,
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::BlobNotFound);
}

#[tokio::test]
async fn test_put_blob_replaces_block_list() {
    let server = TestService::start().await;
    server.create_container("test-container").await;

    let a = block_id(1);
    server.stage("test-container", "blob.txt", &a, b"from blocks").await;
    let committed = commit(&server, "test-container", "blob.txt", &latest(&[&a]))
        .await
        .unwrap();

    let uploaded = server
        .upload("test-container", "blob.txt", b"single shot")
        .await;
    assert_ne!(uploaded.etag, committed.etag);

    let list = handlers::get_block_list(
        &server.blob_ctx("test-container", "blob.txt"),
        server.service.blobs(),
        BlockListType::All,
    )
    .await
    .unwrap();
    assert!(list.committed.is_empty());
    assert!(list.uncommitted.is_empty());

    let blob = handlers::get_blob_properties(
        &server.blob_ctx("test-container", "blob.txt"),
        server.service.blobs(),
    )
    .await
    .unwrap();
    assert!(blob.committed_blocks_in_order.is_empty());
    assert_eq!(blob.properties.content_length, 11);
    assert_eq!(
        server.download("test-container", "blob.txt").await.as_ref(),
        b"single shot"
    );

    let err = commit(
        &server,
        "test-container",
        "blob.txt",
        &[BlockLookup::new(a.as_str(), BlockListKind::Committed)],
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidBlockList);
}

#[tokio::test]
async fn test_recommit_keeps_creation_time() {
    let server = TestService::start().await;
    server.create_container("test-container").await;

    let (a, b) = (block_id(1), block_id(2));
    server.stage("test-container", "blob.txt", &a, b"a").await;
    commit(&server, "test-container", "blob.txt", &latest(&[&a]))
        .await
        .unwrap();
    let ctx = server.blob_ctx("test-container", "blob.txt");
    let first = handlers::get_blob_properties(&ctx, server.service.blobs())
        .await
        .unwrap();

    server.stage("test-container", "blob.txt", &b, b"b").await;
    commit(&server, "test-container", "blob.txt", &latest(&[&b]))
        .await
        .unwrap();
    let second = handlers::get_blob_properties(&ctx, server.service.blobs())
        .await
        .unwrap();

    assert_eq!(second.properties.created_on, first.properties.created_on);
    assert_ne!(second.properties.etag, first.properties.etag);
    assert_eq!(second.committed_blocks_in_order.len(), 1);

    // A single-shot overwrite keeps it too.
    server.upload("test-container", "blob.txt", b"replaced").await;
    let third = handlers::get_blob_properties(&ctx, server.service.blobs())
        .await
        .unwrap();
    assert_eq!(third.properties.created_on, first.properties.created_on);
    assert!(third.persistency.is_some());
}

#[tokio::test]
async fn test_commit_if_match() {
    let server = TestService::start().await;
    server.create_container("test-container").await;

    let a = block_id(1);
    server.stage("test-container", "blob.txt", &a, b"a").await;

    // No committed blob yet, so any precondition fails.
    let ctx = server
        .blob_ctx("test-container", "blob.txt")
        .with_if_match("*");
    let err = handlers::commit_block_list(&ctx, server.service.blobs(), &latest(&[&a]))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ConditionNotMet);

    let committed = commit(&server, "test-container", "blob.txt", &latest(&[&a]))
        .await
        .unwrap();

    let stale = server
        .blob_ctx("test-container", "blob.txt")
        .with_if_match("\"0xstale\"");
    let err = handlers::commit_block_list(
        &stale,
        server.service.blobs(),
        &[BlockLookup::new(a.as_str(), BlockListKind::Committed)],
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::ConditionNotMet);

    let current = server
        .blob_ctx("test-container", "blob.txt")
        .with_if_match(committed.etag.as_str());
    let recommitted = handlers::commit_block_list(
        &current,
        server.service.blobs(),
        &[BlockLookup::new(a.as_str(), BlockListKind::Committed)],
    )
    .await
    .unwrap();
    assert_ne!(recommitted.etag, committed.etag);
}

#[tokio::test]
async fn test_stage_block_validation() {
    let server = TestService::start().await;
    server.create_container("test-container").await;

    let err = handlers::stage_block(
        &server.blob_ctx("test-container", "blob.txt"),
        "not base64!",
        server.service.blobs(),
        server.service.extents(),
        bytes_stream("data"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidBlockId);

    let ctx = server
        .blob_ctx("test-container", "blob.txt")
        .with_content_length(3);
    let err = handlers::stage_block(
        &ctx,
        &block_id(1),
        server.service.blobs(),
        server.service.extents(),
        bytes_stream("four"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::ContentLengthMismatch);

    let ctx = server
        .blob_ctx("test-container", "blob.txt")
        .with_content_md5(vec![0u8; 16]);
    let err = handlers::stage_block(
        &ctx,
        &block_id(1),
        server.service.blobs(),
        server.service.extents(),
        bytes_stream("data"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::Md5Mismatch);

    // None of the rejected stages left a block behind.
    let err = handlers::get_block_list(
        &server.blob_ctx("test-container", "blob.txt"),
        server.service.blobs(),
        BlockListType::All,
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::BlobNotFound);
}

#[tokio::test]
async fn test_stage_block_returns_md5() {
    let server = TestService::start().await;
    server.create_container("test-container").await;

    let response = handlers::stage_block(
        &server.blob_ctx("test-container", "blob.txt"),
        &block_id(1),
        server.service.blobs(),
        server.service.extents(),
        chunked_stream(b"chunked block body".to_vec(), 4),
    )
    .await
    .unwrap();
    assert_eq!(
        response.content_md5,
        Md5::digest(b"chunked block body").to_vec()
    );
}

#[tokio::test]
async fn test_stage_block_from_url_not_implemented() {
    let server = TestService::start().await;
    let err = handlers::stage_block_from_url(
        &server.blob_ctx("test-container", "blob.txt"),
        &block_id(1),
        "https://example.com/source",
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotImplemented);
}

#[tokio::test]
async fn test_concurrent_staging_then_commit() {
    let server = Arc::new(TestService::on_disk().await);
    server.create_container("test-container").await;

    let mut tasks = Vec::new();
    for n in 0..16u32 {
        let server = server.clone();
        tasks.push(tokio::spawn(async move {
            let payload = vec![n as u8; 1000 + n as usize];
            server
                .stage("test-container", "big.bin", &block_id(n), &payload)
                .await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let ids: Vec<String> = (0..16).map(block_id).collect();
    let refs: Vec<BlockLookup> = ids.iter().map(|id| BlockLookup::latest(id.as_str())).collect();
    let response = commit(&server, "test-container", "big.bin", &refs)
        .await
        .unwrap();
    assert!(!response.etag.is_empty());

    let expected: Vec<u8> = (0..16u32)
        .flat_map(|n| vec![n as u8; 1000 + n as usize])
        .collect();
    assert_eq!(
        server.download("test-container", "big.bin").await.as_ref(),
        expected.as_slice()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_writes_leave_one_whole_outcome() {
    let server = Arc::new(TestService::without_safety_window().await);
    server.create_container("test-container").await;
    let shared = block_id(1);

    let mut tasks = Vec::new();
    for n in 0..24u8 {
        let server = server.clone();
        let shared = shared.clone();
        tasks.push(tokio::spawn(async move {
            let payload = vec![n; 100 + n as usize];
            if n % 2 == 0 {
                server.upload("test-container", "race.bin", &payload).await;
            } else {
                server
                    .stage("test-container", "race.bin", &shared, &payload)
                    .await;
                // A concurrent upload may discard the staged block first.
                match commit(&server, "test-container", "race.bin", &latest(&[&shared])).await {
                    Ok(_) => {}
                    Err(err) => assert_eq!(err.code, ErrorCode::InvalidBlockList),
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let blob = handlers::get_blob_properties(
        &server.blob_ctx("test-container", "race.bin"),
        server.service.blobs(),
    )
    .await
    .unwrap();
    let length = blob.properties.content_length;
    match &blob.persistency {
        Some(locator) => {
            assert!(blob.committed_blocks_in_order.is_empty());
            assert_eq!(locator.count, length);
        }
        None => {
            assert_eq!(blob.committed_blocks_in_order.len(), 1);
            assert_eq!(blob.committed_blocks_in_order[0].size, length);
        }
    }

    // The content comes from exactly one writer.
    let body = server.download("test-container", "race.bin").await;
    assert_eq!(body.len() as u64, length);
    let writer = body[0];
    assert_eq!(length, 100 + writer as u64);
    assert!(body.iter().all(|b| *b == writer));

    let blobs = server.service.blobs();
    for locator in blob.content_locators() {
        assert!(blobs.has_extent_reference(&locator.id).await.unwrap());
    }

    // Whatever GC keeps is exactly what the metadata still references.
    let_extents_age().await;
    server.service.gc().collect().await.unwrap();
    let (remaining, _) = server
        .service
        .extent_metadata()
        .list_extents(None, None, None, None)
        .await
        .unwrap();
    for extent in &remaining {
        assert!(blobs.has_extent_reference(&extent.id).await.unwrap());
    }
    assert!(remaining
        .iter()
        .any(|extent| blob.content_locators()[0].id == extent.id));
    assert_eq!(
        server.download("test-container", "race.bin").await.as_ref(),
        body.as_ref()
    );
}
