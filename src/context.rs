//! Request context handed to the handlers by the transport layer.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::collections::HashMap;
use uuid::Uuid;

use crate::config::DEFAULT_ACCOUNT;
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::{BlobHttpHeaders, Marker};

/// Resolved request: target resource, declared body properties and headers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique request ID.
    pub request_id: String,
    pub account: String,
    pub container: Option<String>,
    pub blob: Option<String>,
    /// Snapshot timestamp; empty for the base blob.
    pub snapshot: String,
    /// Caller-declared body length.
    pub content_length: Option<u64>,
    /// Content-Type of the request body.
    pub content_type: Option<String>,
    /// Decoded Content-MD5 of the request body.
    pub content_md5: Option<Vec<u8>>,
    /// `x-ms-blob-*` headers to store on the blob.
    pub http_headers: BlobHttpHeaders,
    /// User-defined metadata from `x-ms-meta-*` headers.
    pub metadata: HashMap<String, String>,
    pub if_match: Option<String>,
}

impl RequestContext {
    /// Creates a context for an account-level request.
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            account: account.into(),
            container: None,
            blob: None,
            snapshot: String::new(),
            content_length: None,
            content_type: None,
            content_md5: None,
            http_headers: BlobHttpHeaders::default(),
            metadata: HashMap::new(),
            if_match: None,
        }
    }

    pub fn for_container(account: impl Into<String>, container: impl Into<String>) -> Self {
        let mut ctx = Self::new(account);
        ctx.container = Some(container.into());
        ctx
    }

    pub fn for_blob(
        account: impl Into<String>,
        container: impl Into<String>,
        blob: impl Into<String>,
    ) -> Self {
        let mut ctx = Self::for_container(account, container);
        ctx.blob = Some(blob.into());
        ctx
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_snapshot(mut self, snapshot: impl Into<String>) -> Self {
        self.snapshot = snapshot.into();
        self
    }

    pub fn with_content_length(mut self, content_length: u64) -> Self {
        self.content_length = Some(content_length);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_content_md5(mut self, md5: impl Into<Vec<u8>>) -> Self {
        self.content_md5 = Some(md5.into());
        self
    }

    /// Sets the Content-MD5 from its base64 header form.
    pub fn with_content_md5_base64(self, md5: &str) -> StorageResult<Self> {
        let decoded = BASE64
            .decode(md5)
            .map_err(|_| StorageError::new(ErrorCode::InvalidMd5))?;
        Ok(self.with_content_md5(decoded))
    }

    pub fn with_http_headers(mut self, headers: BlobHttpHeaders) -> Self {
        self.http_headers = headers;
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_if_match(mut self, etag: impl Into<String>) -> Self {
        self.if_match = Some(etag.into());
        self
    }

    /// Returns the container name, or `InvalidResourceName` when absent.
    pub fn container_name(&self) -> StorageResult<&str> {
        self.container
            .as_deref()
            .ok_or_else(|| StorageError::new(ErrorCode::InvalidResourceName))
    }

    /// Returns the blob name, or `InvalidResourceName` when absent.
    pub fn blob_name(&self) -> StorageResult<&str> {
        self.blob
            .as_deref()
            .ok_or_else(|| StorageError::new(ErrorCode::InvalidResourceName))
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(DEFAULT_ACCOUNT)
    }
}

/// Query parameters for list operations.
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub prefix: Option<String>,
    /// Token returned as the previous page's next marker.
    pub marker: Option<String>,
    pub max_results: Option<u32>,
}

impl ListParams {
    pub fn from_query(query: &HashMap<String, String>) -> Self {
        Self {
            prefix: query.get("prefix").cloned(),
            marker: query.get("marker").cloned(),
            max_results: query.get("maxresults").and_then(|v| v.parse().ok()),
        }
    }

    /// Parses the marker token; an empty token means the first page.
    pub fn marker(&self) -> StorageResult<Option<Marker>> {
        match self.marker.as_deref() {
            None | Some("") => Ok(None),
            Some(token) => token.parse().map(Some),
        }
    }
}
