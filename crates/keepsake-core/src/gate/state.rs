//! Gate states and step payloads.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Idle,
    /// Started; waiting for the acknowledgement.
    Step1Acknowledged,
    /// Acknowledged; waiting for the literal token.
    Step2TokenVerified,
    /// All checks passed; waiting for the final confirm.
    Step3FinalReview,
    Executed,
    Cancelled,
}

impl GateState {
    /// Whether `cancel` is accepted in this state.
    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            Self::Step1Acknowledged | Self::Step2TokenVerified | Self::Step3FinalReview
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Executed | Self::Cancelled)
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Step1Acknowledged => write!(f, "step1_acknowledged"),
            Self::Step2TokenVerified => write!(f, "step2_token_verified"),
            Self::Step3FinalReview => write!(f, "step3_final_review"),
            Self::Executed => write!(f, "executed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Operator input for one `advance`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatePayload {
    Acknowledge(bool),
    Token(String),
}
