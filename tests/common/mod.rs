//! Common test utilities.

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use rand::RngCore;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

use azurite_store::handlers::{self, BlobResponse};
use azurite_store::stream::{bytes_stream, read_to_bytes};
use azurite_store::{Config, RequestContext, StorageService, DEFAULT_ACCOUNT};

/// Storage service wrapper for tests.
pub struct TestService {
    pub service: StorageService,
    pub account: String,
    workspace: Option<TempDir>,
}

impl TestService {
    /// Starts an in-memory service.
    pub async fn start() -> Self {
        Self::with_config(Config::default()).await
    }

    /// Starts an in-memory service whose GC considers every extent old enough.
    pub async fn without_safety_window() -> Self {
        Self::with_config(Config {
            safety_window: Duration::ZERO,
            ..Config::default()
        })
        .await
    }

    pub async fn with_config(config: Config) -> Self {
        let service = StorageService::open(config).await.unwrap();
        Self {
            service,
            account: DEFAULT_ACCOUNT.to_string(),
            workspace: None,
        }
    }

    /// Starts a filesystem-backed service in a fresh temporary workspace.
    pub async fn on_disk() -> Self {
        Self::on_disk_with(|_| {}).await
    }

    pub async fn on_disk_with(adjust: impl FnOnce(&mut Config)) -> Self {
        let workspace = TempDir::new().unwrap();
        let mut config = Config::persistent(workspace.path());
        adjust(&mut config);

        let service = StorageService::open(config).await.unwrap();
        Self {
            service,
            account: DEFAULT_ACCOUNT.to_string(),
            workspace: Some(workspace),
        }
    }

    /// Closes the service and opens a new one over the same workspace.
    pub async fn reopen(self) -> Self {
        self.service.close().await.unwrap();
        let config = self.service.config().clone();
        let service = StorageService::open(config).await.unwrap();
        Self {
            service,
            account: self.account,
            workspace: self.workspace,
        }
    }

    pub fn workspace(&self) -> Option<&Path> {
        self.workspace.as_ref().map(|w| w.path())
    }

    pub fn container_ctx(&self, container: &str) -> RequestContext {
        RequestContext::for_container(self.account.as_str(), container)
    }

    pub fn blob_ctx(&self, container: &str, blob: &str) -> RequestContext {
        RequestContext::for_blob(self.account.as_str(), container, blob)
    }

    pub async fn create_container(&self, name: &str) {
        handlers::create_container(&self.container_ctx(name), self.service.blobs())
            .await
            .unwrap();
    }

    pub async fn upload(&self, container: &str, blob: &str, data: &[u8]) -> BlobResponse {
        let ctx = self
            .blob_ctx(container, blob)
            .with_content_length(data.len() as u64);
        handlers::upload_block_blob(
            &ctx,
            self.service.blobs(),
            self.service.extents(),
            bytes_stream(data.to_vec()),
        )
        .await
        .unwrap()
    }

    pub async fn stage(&self, container: &str, blob: &str, block_id: &str, data: &[u8]) {
        let ctx = self
            .blob_ctx(container, blob)
            .with_content_length(data.len() as u64);
        handlers::stage_block(
            &ctx,
            block_id,
            self.service.blobs(),
            self.service.extents(),
            bytes_stream(data.to_vec()),
        )
        .await
        .unwrap();
    }

    pub async fn download(&self, container: &str, blob: &str) -> Bytes {
        let response = handlers::download_blob(
            &self.blob_ctx(container, blob),
            self.service.blobs(),
            self.service.extents(),
        )
        .await
        .unwrap();
        read_to_bytes(response.body).await.unwrap()
    }
}

/// Base64 block id for the n-th block.
pub fn block_id(n: u32) -> String {
    BASE64.encode(format!("block-{:06}", n))
}

/// Random payload of `len` bytes.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    data
}

/// Waits until freshly written extents are older than a zero safety window.
pub async fn let_extents_age() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
