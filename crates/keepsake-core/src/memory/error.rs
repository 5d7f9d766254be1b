//! Error types for the memory subsystem.

use crate::storage::StorageError;

use super::entry::MemoryId;

/// Reasons a candidate entry is refused at admission. Nothing is stored.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AdmissionError {
    #[error("importance {importance} is below the admission threshold {threshold}")]
    BelowThreshold { importance: f64, threshold: f64 },

    #[error("importance {0} is outside [0.0, 1.0]")]
    ImportanceOutOfRange(f64),

    #[error("malformed tag path '{raw}': {reason}")]
    MalformedTag { raw: String, reason: String },

    #[error("memory capacity of {max} entries reached")]
    CapacityReached { max: usize },
}

/// Errors produced by memory store operations.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("admission rejected: {0}")]
    Admission(#[from] AdmissionError),

    #[error("memory not found: {id}")]
    NotFound { id: MemoryId },

    #[error("memory {id} is high_lock; only a gated action with include_locked may remove it")]
    Locked { id: MemoryId },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for memory operations.
pub type MemoryResult<T> = std::result::Result<T, MemoryError>;
