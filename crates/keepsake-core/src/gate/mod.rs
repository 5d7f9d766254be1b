//! Multi-step confirmation for destructive operations.
//!
//! A [`DestructiveGate`] is bound to one [`BoundAction`] at `start` and walks
//! `Idle -> Step1Acknowledged -> Step2TokenVerified -> Step3FinalReview ->
//! Executed`. Destructive kinds take an emergency snapshot before the action
//! runs. Cancelling from any intermediate step discards all progress.

pub mod action;
pub mod error;
pub mod kind;
pub mod machine;
pub mod state;

pub use action::{
    ActionContext, ActionOutcome, BoundAction, DeleteAction, ExportAction, ExportDocument,
    GateObserver, NullObserver, PurgeAction,
};
pub use error::{ActionError, ConfirmationError, GateError, GateResult};
pub use kind::{ActionKind, ActionRequirement};
pub use machine::{DestructiveGate, GateReport};
pub use state::{GatePayload, GateState};
