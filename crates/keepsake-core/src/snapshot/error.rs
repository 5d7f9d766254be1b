//! Error types for snapshot capture and restore.

use crate::memory::error::MemoryError;
use crate::storage::StorageError;

use super::SnapshotId;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot not found: {0}")]
    NotFound(SnapshotId),

    #[error("invalid snapshot id: {0}")]
    InvalidId(String),

    #[error("snapshot {id} failed verification: expected digest {expected}, found {actual}")]
    DigestMismatch {
        id: SnapshotId,
        expected: String,
        actual: String,
    },

    #[error("snapshot {id} is unreadable: {reason}")]
    Corrupt { id: SnapshotId, reason: String },

    #[error("store error: {0}")]
    Store(#[from] MemoryError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SnapshotResult<T> = std::result::Result<T, SnapshotError>;
