//! Actions a gate can run once confirmed, and the observer it reports to.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::entry::{MemoryEntry, MemoryId, MemoryKind};
use crate::memory::store::{MemoryStore, PurgeScope};
use crate::snapshot::SnapshotId;
use crate::storage::fs::write_atomic;

use super::error::ActionError;
use super::kind::ActionKind;
use super::state::GateState;

/// Options fixed when the gate is started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionContext {
    /// Let destructive actions touch `HighLock` entries.
    pub include_locked: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Entries removed or written.
    pub affected: usize,
    /// In-scope entries left alone because they are locked.
    pub retained_locked: usize,
    /// File the action produced, if any.
    pub output: Option<PathBuf>,
}

/// The operation a gate runs after confirmation.
pub trait BoundAction: Send + Sync {
    fn kind(&self) -> ActionKind;

    fn execute(&self, ctx: &ActionContext) -> Result<ActionOutcome, ActionError>;
}

/// Callbacks for the collaborator driving the gate.
pub trait GateObserver: Send + Sync {
    fn on_complete(&self, _kind: ActionKind, _outcome: &ActionOutcome, _snapshot: Option<&SnapshotId>) {}

    fn on_cancel(&self, _kind: ActionKind, _at: GateState) {}
}

/// Observer that ignores every callback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl GateObserver for NullObserver {}

/// Bulk removal through the store's purge path.
pub struct PurgeAction {
    store: Arc<MemoryStore>,
    kind: ActionKind,
    scope: PurgeScope,
}

impl PurgeAction {
    /// Remove every conversation entry.
    pub fn clear_history(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            kind: ActionKind::ClearHistory,
            scope: PurgeScope::Kind(MemoryKind::Conversation),
        }
    }

    /// Remove everything.
    pub fn full_reset(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            kind: ActionKind::FullReset,
            scope: PurgeScope::All,
        }
    }
}

impl BoundAction for PurgeAction {
    fn kind(&self) -> ActionKind {
        self.kind
    }

    fn execute(&self, ctx: &ActionContext) -> Result<ActionOutcome, ActionError> {
        let report = self.store.purge(&self.scope, ctx.include_locked)?;
        Ok(ActionOutcome {
            affected: report.removed.len(),
            retained_locked: report.retained_locked,
            output: None,
        })
    }
}

/// Removal of an explicit set of entries. Unknown ids are ignored.
pub struct DeleteAction {
    store: Arc<MemoryStore>,
    ids: BTreeSet<MemoryId>,
}

impl DeleteAction {
    pub fn new(store: Arc<MemoryStore>, ids: impl IntoIterator<Item = MemoryId>) -> Self {
        Self {
            store,
            ids: ids.into_iter().collect(),
        }
    }
}

impl BoundAction for DeleteAction {
    fn kind(&self) -> ActionKind {
        ActionKind::DeleteEntries
    }

    fn execute(&self, ctx: &ActionContext) -> Result<ActionOutcome, ActionError> {
        let report = self
            .store
            .purge(&PurgeScope::Ids(self.ids.clone()), ctx.include_locked)?;
        Ok(ActionOutcome {
            affected: report.removed.len(),
            retained_locked: report.retained_locked,
            output: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub exported_at: DateTime<Utc>,
    pub entry_count: usize,
    pub entries: Vec<MemoryEntry>,
}

/// Writes every entry, payloads included, to a pretty-printed JSON file.
pub struct ExportAction {
    store: Arc<MemoryStore>,
    path: PathBuf,
}

impl ExportAction {
    pub fn new(store: Arc<MemoryStore>, path: impl Into<PathBuf>) -> Self {
        Self {
            store,
            path: path.into(),
        }
    }
}

impl BoundAction for ExportAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Export
    }

    fn execute(&self, _ctx: &ActionContext) -> Result<ActionOutcome, ActionError> {
        let entries = self
            .store
            .frozen_view()
            .iter()
            .map(|record| self.store.hydrate_record(record))
            .collect::<Result<Vec<_>, _>>()?;
        let doc = ExportDocument {
            exported_at: Utc::now(),
            entry_count: entries.len(),
            entries,
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        write_atomic(&dir, &self.path, &serde_json::to_vec_pretty(&doc)?)?;

        Ok(ActionOutcome {
            affected: doc.entry_count,
            retained_locked: 0,
            output: Some(self.path.clone()),
        })
    }
}
