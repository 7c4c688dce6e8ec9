//! Error types for the version store.

use crate::merge::Conflict;
use crate::types::{CommitId, ContentHash};
use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Reference not found: {0}")]
    ReferenceNotFound(String),

    #[error("Commit not found: {0}")]
    CommitNotFound(CommitId),

    #[error("Content not found: {0}")]
    ContentNotFound(ContentHash),

    #[error("Reference already exists: {0}")]
    ReferenceAlreadyExists(String),

    #[error("Reference conflict on '{name}': expected {expected}, found {actual}")]
    ReferenceConflict {
        name: String,
        expected: CommitId,
        actual: CommitId,
    },

    #[error("Merge conflict on {} key(s)", .0.len())]
    MergeConflict(Vec<Conflict>),

    #[error("No common ancestor between {0} and {1}")]
    NoCommonAncestor(CommitId, CommitId),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Permission denied: {principal} may not {action} on '{resource}'")]
    PermissionDenied {
        principal: String,
        action: String,
        resource: String,
    },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Hash mismatch: expected {expected}, got {got}")]
    HashMismatch { expected: String, got: String },

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,
}

impl StoreError {
    /// True for errors a caller is expected to resolve by re-reading state
    /// and retrying the whole operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::ReferenceConflict { .. })
    }

    /// True for the not-found family (reference, commit, content).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::ReferenceNotFound(_)
                | StoreError::CommitNotFound(_)
                | StoreError::ContentNotFound(_)
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
