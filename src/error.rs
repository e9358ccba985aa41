//! Storage error types.

use thiserror::Error;

/// Error codes raised by the storage engine.
///
/// The names follow the Azure Blob Storage error codes where one exists, so an
/// external response layer can emit `as_str()` verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Resource errors
    ContainerAlreadyExists,
    ContainerNotFound,
    BlobNotFound,
    ExtentNotFound,

    // Request validation errors
    ContentLengthMismatch,
    Md5Mismatch,
    InvalidMd5,
    InvalidBlockId,
    InvalidBlockList,
    InvalidInput,
    InvalidResourceName,
    ConditionNotMet,

    // Engine errors
    NotInitialized,
    IoError,
    NotImplemented,
    InternalError,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ContainerAlreadyExists => "ContainerAlreadyExists",
            ErrorCode::ContainerNotFound => "ContainerNotFound",
            ErrorCode::BlobNotFound => "BlobNotFound",
            ErrorCode::ExtentNotFound => "ExtentNotFound",
            ErrorCode::ContentLengthMismatch => "ContentLengthMismatch",
            ErrorCode::Md5Mismatch => "Md5Mismatch",
            ErrorCode::InvalidMd5 => "InvalidMd5",
            ErrorCode::InvalidBlockId => "InvalidBlockId",
            ErrorCode::InvalidBlockList => "InvalidBlockList",
            ErrorCode::InvalidInput => "InvalidInput",
            ErrorCode::InvalidResourceName => "InvalidResourceName",
            ErrorCode::ConditionNotMet => "ConditionNotMet",
            ErrorCode::NotInitialized => "NotInitialized",
            ErrorCode::IoError => "IoError",
            ErrorCode::NotImplemented => "NotImplemented",
            ErrorCode::InternalError => "InternalError",
        }
    }

    /// Returns the HTTP status a response layer should use for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorCode::ContentLengthMismatch
            | ErrorCode::Md5Mismatch
            | ErrorCode::InvalidMd5
            | ErrorCode::InvalidBlockId
            | ErrorCode::InvalidBlockList
            | ErrorCode::InvalidInput
            | ErrorCode::InvalidResourceName => 400,

            ErrorCode::ContainerNotFound | ErrorCode::BlobNotFound | ErrorCode::ExtentNotFound => {
                404
            }

            ErrorCode::ContainerAlreadyExists => 409,

            ErrorCode::ConditionNotMet => 412,

            ErrorCode::NotImplemented => 501,

            ErrorCode::NotInitialized | ErrorCode::IoError | ErrorCode::InternalError => 500,
        }
    }

    /// Returns the default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::ContainerAlreadyExists => "The specified container already exists.",
            ErrorCode::ContainerNotFound => "The specified container does not exist.",
            ErrorCode::BlobNotFound => "The specified blob does not exist.",
            ErrorCode::ExtentNotFound => "The specified extent does not exist.",
            ErrorCode::ContentLengthMismatch => {
                "The size of the request body mismatches the content-length."
            }
            ErrorCode::Md5Mismatch => {
                "The MD5 value specified in the request did not match with the MD5 value \
                 calculated by the server."
            }
            ErrorCode::InvalidMd5 => "The MD5 value specified in the request is invalid.",
            ErrorCode::InvalidBlockId => "The specified block ID is invalid.",
            ErrorCode::InvalidBlockList => "The specified block list is invalid.",
            ErrorCode::InvalidInput => "One of the request inputs is not valid.",
            ErrorCode::InvalidResourceName => "The specified resource name contains invalid characters.",
            ErrorCode::ConditionNotMet => "The condition specified using HTTP conditional header(s) is not met.",
            ErrorCode::NotInitialized => "The store is not initialized or has been closed.",
            ErrorCode::IoError => "The server encountered an I/O error.",
            ErrorCode::NotImplemented => "The requested operation is not implemented.",
            ErrorCode::InternalError => {
                "The server encountered an internal error. Please retry the request."
            }
        }
    }

    /// Whether this code belongs to the not-found family.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ErrorCode::ContainerNotFound | ErrorCode::BlobNotFound | ErrorCode::ExtentNotFound
        )
    }
}

/// Storage error with code and message.
#[derive(Debug, Error)]
#[error("{code:?}: {message}")]
pub struct StorageError {
    pub code: ErrorCode,
    pub message: String,
    pub request_id: Option<String>,
}

impl StorageError {
    /// Creates a new storage error with the given code and default message.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            message: code.default_message().to_string(),
            code,
            request_id: None,
        }
    }

    /// Creates a new storage error with a custom message.
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            request_id: None,
        }
    }

    /// Sets the request ID for this error.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::with_message(ErrorCode::IoError, err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::with_message(
            ErrorCode::InternalError,
            format!("Failed to (de)serialize metadata: {}", err),
        )
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
