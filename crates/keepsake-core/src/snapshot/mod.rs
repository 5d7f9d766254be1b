//! Point-in-time captures of the memory store.
//!
//! Scheduled captures are gzip-compressed and rotation-capped. Emergency
//! captures are plain JSON and stay until removed by hand. The tag index is
//! never captured; restore rebuilds it from the entries.

pub mod error;
pub mod manager;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::entry::MemoryEntry;
use crate::storage::Digest;

pub use error::{SnapshotError, SnapshotResult};
pub use manager::{RestoreReport, SnapshotInfo, SnapshotManager};

pub const FORMAT_VERSION: u32 = 1;

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotReason {
    /// Periodic capture; subject to rotation.
    Scheduled,
    /// Taken before a destructive action, a restore, or at shutdown.
    Emergency,
}

impl SnapshotReason {
    fn prefix(self) -> &'static str {
        match self {
            Self::Scheduled => "memory_backup_",
            Self::Emergency => "emergency_backup_",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Self::Scheduled => "json.gz",
            Self::Emergency => "json",
        }
    }
}

impl fmt::Display for SnapshotReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Emergency => write!(f, "emergency"),
        }
    }
}

/// File stem of a capture, e.g. `memory_backup_20260101_093000_000123`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SnapshotId {
    stem: String,
    reason: SnapshotReason,
    taken_at: DateTime<Utc>,
}

impl SnapshotId {
    pub(crate) fn new(reason: SnapshotReason, taken_at: DateTime<Utc>) -> Self {
        let stem = format!(
            "{}{}_{:06}",
            reason.prefix(),
            taken_at.format(STAMP_FORMAT),
            taken_at.nanosecond() / 1_000
        );
        Self {
            stem,
            reason,
            taken_at,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.stem
    }

    pub fn reason(&self) -> SnapshotReason {
        self.reason
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.stem, self.reason.extension())
    }

    /// Recover the id from a file name in the snapshot directory.
    pub fn from_file_name(name: &str) -> Option<Self> {
        [SnapshotReason::Scheduled, SnapshotReason::Emergency]
            .into_iter()
            .find_map(|reason| {
                name.strip_suffix(reason.extension())
                    .and_then(|s| s.strip_suffix('.'))
                    .filter(|stem| stem.starts_with(reason.prefix()))
            })
            .and_then(|stem| stem.parse().ok())
    }
}

impl FromStr for SnapshotId {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SnapshotError::InvalidId(s.to_string());
        let (reason, stamp) = [SnapshotReason::Scheduled, SnapshotReason::Emergency]
            .into_iter()
            .find_map(|r| s.strip_prefix(r.prefix()).map(|rest| (r, rest)))
            .ok_or_else(invalid)?;

        let (clock, micros) = stamp.rsplit_once('_').ok_or_else(invalid)?;
        if micros.len() != 6 {
            return Err(invalid());
        }
        let micros: u32 = micros.parse().map_err(|_| invalid())?;
        let naive = NaiveDateTime::parse_from_str(clock, STAMP_FORMAT)
            .map_err(|_| invalid())?
            .with_nanosecond(micros * 1_000)
            .ok_or_else(invalid)?;

        Ok(Self {
            stem: s.to_string(),
            reason,
            taken_at: naive.and_utc(),
        })
    }
}

impl TryFrom<String> for SnapshotId {
    type Error = SnapshotError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SnapshotId> for String {
    fn from(id: SnapshotId) -> Self {
        id.stem
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stem)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub id: SnapshotId,
    pub reason: SnapshotReason,
    pub taken_at: DateTime<Utc>,
    pub entry_count: usize,
    /// SHA-256 over the serialized entries.
    pub content_digest: String,
    pub format_version: u32,
}

/// On-disk form of a capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub meta: SnapshotMeta,
    pub entries: Vec<MemoryEntry>,
}

pub(crate) fn content_digest(entries: &[MemoryEntry]) -> SnapshotResult<String> {
    Ok(Digest::compute(&serde_json::to_vec(entries)?).to_hex())
}

/// Anything that can capture the store on demand.
pub trait Snapshotter: Send + Sync {
    fn snapshot(&self, reason: SnapshotReason) -> SnapshotResult<SnapshotId>;
}
