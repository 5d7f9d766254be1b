//! Error types for the destructive action gate.

use crate::memory::error::MemoryError;
use crate::snapshot::SnapshotError;
use crate::storage::StorageError;

use super::kind::ActionKind;
use super::state::GateState;

/// A step payload was refused. The gate state is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfirmationError {
    #[error("acknowledgement is required to continue")]
    AcknowledgementMissing,

    #[error("confirmation token does not match")]
    TokenMismatch,

    #[error("payload not accepted in state {0}")]
    UnexpectedPayload(GateState),
}

/// Failure of a bound action.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("store error: {0}")]
    Memory(#[from] MemoryError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error(transparent)]
    Confirmation(#[from] ConfirmationError),

    #[error("cannot {operation} while {state}")]
    InvalidTransition {
        state: GateState,
        operation: &'static str,
    },

    /// The pre-action snapshot failed; the gate stays in final review.
    #[error("snapshot before {kind} failed: {source}")]
    Snapshot {
        kind: ActionKind,
        #[source]
        source: SnapshotError,
    },

    /// The bound action failed; the gate stays in final review.
    #[error("{kind} failed: {source}")]
    ActionFailed {
        kind: ActionKind,
        #[source]
        source: ActionError,
    },
}

pub type GateResult<T> = std::result::Result<T, GateError>;
