//! The confirmation state machine.
//!
//! Every transition is synchronous and driven by the caller. A refused
//! payload never changes state. `confirm` runs to completion: snapshot first
//! (destructive kinds only), then the bound action, then the observer.

use std::sync::Arc;

use tracing::warn;

use crate::obs;
use crate::snapshot::{SnapshotId, SnapshotReason, Snapshotter};

use super::action::{ActionContext, ActionOutcome, BoundAction, GateObserver, NullObserver};
use super::error::{ConfirmationError, GateError, GateResult};
use super::kind::{ActionKind, ActionRequirement};
use super::state::{GatePayload, GateState};

/// Result of a successful `confirm`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateReport {
    pub kind: ActionKind,
    pub snapshot: Option<SnapshotId>,
    pub outcome: ActionOutcome,
}

struct Pending {
    action: Box<dyn BoundAction>,
    ctx: ActionContext,
}

pub struct DestructiveGate {
    state: GateState,
    kind: Option<ActionKind>,
    pending: Option<Pending>,
    steps_taken: u8,
    snapshotter: Arc<dyn Snapshotter>,
    observer: Arc<dyn GateObserver>,
}

impl DestructiveGate {
    pub fn new(snapshotter: Arc<dyn Snapshotter>) -> Self {
        Self {
            state: GateState::Idle,
            kind: None,
            pending: None,
            steps_taken: 0,
            snapshotter,
            observer: Arc::new(NullObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn GateObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn kind(&self) -> Option<ActionKind> {
        self.kind
    }

    pub fn requirement(&self) -> Option<ActionRequirement> {
        self.kind.map(ActionKind::requirement)
    }

    /// Successful advances plus a successful confirm, since `start`.
    pub fn steps_taken(&self) -> u8 {
        self.steps_taken
    }

    fn transition(&mut self, to: GateState) {
        if let Some(kind) = self.kind {
            obs::emit_gate_transition(&kind.to_string(), &self.state.to_string(), &to.to_string());
        }
        self.state = to;
    }

    fn refuse<T>(&self, operation: &'static str) -> GateResult<T> {
        Err(GateError::InvalidTransition {
            state: self.state,
            operation,
        })
    }

    /// Bind `action` and begin. Single-step kinds go straight to final review.
    pub fn start(&mut self, action: Box<dyn BoundAction>, include_locked: bool) -> GateResult<GateState> {
        if self.state != GateState::Idle {
            return self.refuse("start");
        }
        let kind = action.kind();
        self.kind = Some(kind);
        self.steps_taken = 0;
        self.pending = Some(Pending {
            action,
            ctx: ActionContext { include_locked },
        });
        let next = if kind.step_count() == 1 {
            GateState::Step3FinalReview
        } else {
            GateState::Step1Acknowledged
        };
        self.transition(next);
        Ok(self.state)
    }

    pub fn advance(&mut self, payload: GatePayload) -> GateResult<GateState> {
        let Some(kind) = self.kind else {
            return self.refuse("advance");
        };
        let next = match (self.state, payload) {
            (GateState::Step1Acknowledged, GatePayload::Acknowledge(true)) => {
                GateState::Step2TokenVerified
            }
            (GateState::Step1Acknowledged, GatePayload::Acknowledge(false)) => {
                return Err(ConfirmationError::AcknowledgementMissing.into());
            }
            (GateState::Step2TokenVerified, GatePayload::Token(token)) => {
                if kind.token() != Some(token.as_str()) {
                    return Err(ConfirmationError::TokenMismatch.into());
                }
                GateState::Step3FinalReview
            }
            (
                state @ (GateState::Step1Acknowledged | GateState::Step2TokenVerified),
                _,
            ) => return Err(ConfirmationError::UnexpectedPayload(state).into()),
            _ => return self.refuse("advance"),
        };
        self.steps_taken += 1;
        self.transition(next);
        Ok(self.state)
    }

    /// Run the bound action. On snapshot or action failure the gate stays in
    /// final review so the caller can retry or cancel.
    pub fn confirm(&mut self) -> GateResult<GateReport> {
        if self.state != GateState::Step3FinalReview {
            return self.refuse("confirm");
        }
        let (Some(kind), Some(pending)) = (self.kind, self.pending.as_ref()) else {
            return self.refuse("confirm");
        };

        let snapshot = if kind.is_destructive() {
            match self.snapshotter.snapshot(SnapshotReason::Emergency) {
                Ok(id) => Some(id),
                Err(source) => {
                    warn!(action = %kind, error = %source, "pre-action snapshot failed");
                    return Err(GateError::Snapshot { kind, source });
                }
            }
        } else {
            None
        };

        let outcome = match pending.action.execute(&pending.ctx) {
            Ok(outcome) => outcome,
            Err(source) => {
                warn!(action = %kind, error = %source, "bound action failed");
                return Err(GateError::ActionFailed { kind, source });
            }
        };

        self.steps_taken += 1;
        self.pending = None;
        self.transition(GateState::Executed);
        obs::emit_gate_executed(
            &kind.to_string(),
            snapshot.as_ref().map(SnapshotId::as_str),
            outcome.affected,
        );
        self.observer.on_complete(kind, &outcome, snapshot.as_ref());

        Ok(GateReport {
            kind,
            snapshot,
            outcome,
        })
    }

    /// Abandon the attempt and discard all progress.
    pub fn cancel(&mut self) -> GateResult<GateState> {
        if !self.state.is_cancellable() {
            return self.refuse("cancel");
        }
        let at = self.state;
        self.pending = None;
        self.steps_taken = 0;
        self.transition(GateState::Cancelled);
        if let Some(kind) = self.kind {
            obs::emit_gate_cancelled(&kind.to_string(), &at.to_string());
            self.observer.on_cancel(kind, at);
        }
        Ok(self.state)
    }

    /// Return a finished gate to `Idle` so it can be started again.
    pub fn reset(&mut self) -> GateResult<GateState> {
        match self.state {
            GateState::Idle => {}
            GateState::Executed | GateState::Cancelled => {
                self.transition(GateState::Idle);
                self.kind = None;
                self.steps_taken = 0;
            }
            _ => return self.refuse("reset"),
        }
        Ok(self.state)
    }
}
