//! The composed memory system: store, archive, snapshots, and tiering wired
//! together from one configuration.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

use crate::config::{ConfigError, KeepsakeConfig};
use crate::gate::{BoundAction, DeleteAction, DestructiveGate, ExportAction, PurgeAction};
use crate::memory::entry::MemoryId;
use crate::memory::error::MemoryError;
use crate::memory::retention::{TieringEngine, TieringReport};
use crate::memory::store::MemoryStore;
use crate::snapshot::{SnapshotError, SnapshotId, SnapshotManager, SnapshotMeta, SnapshotReason};
use crate::storage::fs::{FsCasStore, FsEntryStore};
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum SystemError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

pub type SystemResult<T> = std::result::Result<T, SystemError>;

/// What a gate should run once confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionRequest {
    ClearHistory,
    FullReset,
    Delete(Vec<MemoryId>),
    Export(PathBuf),
}

pub struct MemorySystem {
    config: KeepsakeConfig,
    store: Arc<MemoryStore>,
    snapshots: Arc<SnapshotManager>,
    tiering: TieringEngine,
}

impl MemorySystem {
    /// Open the persistent system rooted at `config.memory.data_dir`.
    pub fn open(config: KeepsakeConfig) -> SystemResult<Self> {
        let memory = &config.memory;
        let records = Arc::new(FsEntryStore::new(&memory.data_dir)?);
        let archive = Arc::new(FsCasStore::new(&memory.data_dir)?);
        let store = Arc::new(MemoryStore::open(memory, records, Some(archive))?);
        let snapshots = Arc::new(SnapshotManager::from_config(
            store.clone(),
            &memory.auto_backup,
        )?);
        info!(
            data_dir = %memory.data_dir.display(),
            backups = %snapshots.dir().display(),
            "memory system opened"
        );
        Ok(Self::from_parts(config, store, snapshots))
    }

    /// Assemble from already-built parts. `snapshots` must wrap `store`.
    pub fn from_parts(
        config: KeepsakeConfig,
        store: Arc<MemoryStore>,
        snapshots: Arc<SnapshotManager>,
    ) -> Self {
        let tiering = TieringEngine::new(config.memory.retention_policy.clone());
        Self {
            config,
            store,
            snapshots,
            tiering,
        }
    }

    pub fn config(&self) -> &KeepsakeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn snapshots(&self) -> &Arc<SnapshotManager> {
        &self.snapshots
    }

    pub fn run_tiering(&self, now: DateTime<Utc>) -> TieringReport {
        self.tiering.run_pass(&self.store, now)
    }

    pub fn scheduled_backup(&self) -> Result<SnapshotMeta, SnapshotError> {
        self.snapshots.take(SnapshotReason::Scheduled)
    }

    /// A fresh gate whose pre-action snapshots go to this system's backups.
    pub fn gate(&self) -> DestructiveGate {
        DestructiveGate::new(self.snapshots.clone())
    }

    pub fn action(&self, request: ActionRequest) -> Box<dyn BoundAction> {
        let store = self.store.clone();
        match request {
            ActionRequest::ClearHistory => Box::new(PurgeAction::clear_history(store)),
            ActionRequest::FullReset => Box::new(PurgeAction::full_reset(store)),
            ActionRequest::Delete(ids) => Box::new(DeleteAction::new(store, ids)),
            ActionRequest::Export(path) => Box::new(ExportAction::new(store, path)),
        }
    }

    /// Persist pending access bookkeeping and take an emergency capture.
    pub fn shutdown(&self) -> SystemResult<SnapshotId> {
        let flushed = self.store.flush()?;
        let meta = self.snapshots.take(SnapshotReason::Emergency)?;
        info!(flushed, snapshot = %meta.id, "memory system shut down");
        Ok(meta.id)
    }
}
