//! Action kinds and what each one demands before it may run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Purge conversation entries.
    ClearHistory,
    /// Remove an explicit list of entries.
    DeleteEntries,
    /// Purge everything.
    FullReset,
    /// Write every entry to an export file. Not destructive.
    Export,
}

/// Confirmation demands of one action kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionRequirement {
    /// Successful advances plus the final confirm.
    pub step_count: u8,
    /// Literal the operator must type, matched case-sensitively.
    pub token: Option<&'static str>,
    /// Whether an emergency snapshot precedes the action.
    pub snapshot_first: bool,
}

impl ActionKind {
    pub const ALL: [ActionKind; 4] = [
        Self::ClearHistory,
        Self::DeleteEntries,
        Self::FullReset,
        Self::Export,
    ];

    pub fn requirement(self) -> ActionRequirement {
        match self {
            Self::ClearHistory | Self::DeleteEntries => ActionRequirement {
                step_count: 3,
                token: Some("DELETE"),
                snapshot_first: true,
            },
            Self::FullReset => ActionRequirement {
                step_count: 3,
                token: Some("RESET"),
                snapshot_first: true,
            },
            Self::Export => ActionRequirement {
                step_count: 1,
                token: None,
                snapshot_first: false,
            },
        }
    }

    pub fn step_count(self) -> u8 {
        self.requirement().step_count
    }

    pub fn token(self) -> Option<&'static str> {
        self.requirement().token
    }

    pub fn is_destructive(self) -> bool {
        self.requirement().snapshot_first
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClearHistory => write!(f, "clear-history"),
            Self::DeleteEntries => write!(f, "delete-entries"),
            Self::FullReset => write!(f, "full-reset"),
            Self::Export => write!(f, "export"),
        }
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "clear-history" => Ok(Self::ClearHistory),
            "delete-entries" => Ok(Self::DeleteEntries),
            "full-reset" | "reset" => Ok(Self::FullReset),
            "export" => Ok(Self::Export),
            other => Err(format!("unknown action kind: {other}")),
        }
    }
}
