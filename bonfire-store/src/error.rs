//! Error types for the store layer.

use thiserror::Error;

/// Result type for store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors reported by the remote store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Connectivity failure. Not retried by this layer.
    #[error("transport error: {0}")]
    Transport(String),

    /// Record not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A record with this key already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The store's access rules rejected the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
