//! Capture, rotation, and restore of store snapshots on the filesystem.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, DurationRound, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AutoBackupConfig;
use crate::memory::entry::StoredEntry;
use crate::memory::store::MemoryStore;
use crate::metrics::METRICS;
use crate::obs;
use crate::storage::fs::write_atomic;

use super::error::{SnapshotError, SnapshotResult};
use super::{
    content_digest, SnapshotDocument, SnapshotId, SnapshotMeta, SnapshotReason, Snapshotter,
    FORMAT_VERSION,
};

/// A capture found in the snapshot directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub id: SnapshotId,
    pub reason: SnapshotReason,
    pub taken_at: DateTime<Utc>,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReport {
    pub restored: SnapshotId,
    /// Emergency capture of the live store taken just before it was replaced.
    pub safety: SnapshotId,
    pub entries: usize,
}

pub struct SnapshotManager {
    store: Arc<MemoryStore>,
    dir: PathBuf,
    rotation_cap: Option<usize>,
    last_stamp: Mutex<Option<DateTime<Utc>>>,
}

impl SnapshotManager {
    /// Manager writing into `dir`, keeping at most `rotation_cap` scheduled
    /// captures (`None` keeps all of them). Creates `dir` if needed.
    pub fn new(
        store: Arc<MemoryStore>,
        dir: impl Into<PathBuf>,
        rotation_cap: Option<usize>,
    ) -> SnapshotResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            store,
            dir,
            rotation_cap,
            last_stamp: Mutex::new(None),
        })
    }

    pub fn from_config(store: Arc<MemoryStore>, config: &AutoBackupConfig) -> SnapshotResult<Self> {
        Self::new(store, &config.backup_location, config.rotation_cap())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, id: &SnapshotId) -> PathBuf {
        self.dir.join(id.file_name())
    }

    /// Microsecond timestamp strictly later than any issued before, and not
    /// colliding with a file already on disk.
    fn next_id(&self, reason: SnapshotReason) -> SnapshotId {
        let mut last = self.last_stamp.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now();
        let mut stamp = now.duration_trunc(Duration::microseconds(1)).unwrap_or(now);
        if let Some(prev) = *last {
            if stamp <= prev {
                stamp = prev + Duration::microseconds(1);
            }
        }
        let mut id = SnapshotId::new(reason, stamp);
        while self.path_of(&id).exists() {
            stamp += Duration::microseconds(1);
            id = SnapshotId::new(reason, stamp);
        }
        *last = Some(stamp);
        id
    }

    /// Capture the whole store. The store's read lock is held only while its
    /// records are copied; payload hydration and file I/O happen after.
    pub fn take(&self, reason: SnapshotReason) -> SnapshotResult<SnapshotMeta> {
        self.capture(reason, self.store.frozen_view())
    }

    fn capture(
        &self,
        reason: SnapshotReason,
        records: Vec<StoredEntry>,
    ) -> SnapshotResult<SnapshotMeta> {
        let entries = records
            .iter()
            .map(|r| self.store.hydrate_record(r))
            .collect::<Result<Vec<_>, _>>()?;

        let id = self.next_id(reason);
        let meta = SnapshotMeta {
            id: id.clone(),
            reason,
            taken_at: id.taken_at(),
            entry_count: entries.len(),
            content_digest: content_digest(&entries)?,
            format_version: FORMAT_VERSION,
        };
        let doc = SnapshotDocument {
            meta: meta.clone(),
            entries,
        };

        let json = serde_json::to_vec(&doc)?;
        let bytes = match reason {
            SnapshotReason::Scheduled => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&json)?;
                encoder.finish()?
            }
            SnapshotReason::Emergency => json,
        };
        write_atomic(&self.dir, &self.path_of(&id), &bytes)?;

        obs::emit_snapshot_taken(id.as_str(), &reason.to_string(), meta.entry_count);
        METRICS.inc_snapshots();

        if reason == SnapshotReason::Scheduled {
            if let Err(err) = self.rotate() {
                warn!(error = %err, "snapshot rotation failed");
            }
        }
        Ok(meta)
    }

    /// Every capture in the directory, oldest first.
    pub fn list(&self) -> SnapshotResult<Vec<SnapshotInfo>> {
        let mut found = Vec::new();
        for dirent in fs::read_dir(&self.dir)? {
            let dirent = dirent?;
            let name = dirent.file_name();
            let Some(id) = name.to_str().and_then(SnapshotId::from_file_name) else {
                continue;
            };
            found.push(SnapshotInfo {
                reason: id.reason(),
                taken_at: id.taken_at(),
                size_bytes: dirent.metadata()?.len(),
                id,
            });
        }
        found.sort_by(|a, b| a.taken_at.cmp(&b.taken_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    /// Read and verify a capture.
    pub fn load(&self, id: &SnapshotId) -> SnapshotResult<SnapshotDocument> {
        let raw = match fs::read(self.path_of(id)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SnapshotError::NotFound(id.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        let json = match id.reason() {
            SnapshotReason::Scheduled => {
                let mut out = Vec::new();
                GzDecoder::new(raw.as_slice())
                    .read_to_end(&mut out)
                    .map_err(|e| SnapshotError::Corrupt {
                        id: id.clone(),
                        reason: e.to_string(),
                    })?;
                out
            }
            SnapshotReason::Emergency => raw,
        };
        let doc: SnapshotDocument =
            serde_json::from_slice(&json).map_err(|e| SnapshotError::Corrupt {
                id: id.clone(),
                reason: e.to_string(),
            })?;

        if doc.meta.id != *id || doc.meta.entry_count != doc.entries.len() {
            return Err(SnapshotError::Corrupt {
                id: id.clone(),
                reason: "metadata does not match contents".into(),
            });
        }
        let actual = content_digest(&doc.entries)?;
        if actual != doc.meta.content_digest {
            return Err(SnapshotError::DigestMismatch {
                id: id.clone(),
                expected: doc.meta.content_digest.clone(),
                actual,
            });
        }
        Ok(doc)
    }

    /// Delete a capture. This is the only way emergency captures go away.
    pub fn remove(&self, id: &SnapshotId) -> SnapshotResult<()> {
        match fs::remove_file(self.path_of(id)) {
            Ok(()) => {
                debug!(id = %id, "snapshot removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SnapshotError::NotFound(id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the live store with a verified capture, taking an emergency
    /// capture of the current contents first.
    ///
    /// The emergency capture and the swap happen under one store write lock,
    /// so writers wait for the whole restore rather than landing between them.
    pub fn restore(&self, id: &SnapshotId) -> SnapshotResult<RestoreReport> {
        let doc = self.load(id)?;
        let (entries, safety) = self.store.replace_all(doc.entries, |current| {
            self.capture(SnapshotReason::Emergency, current)
        })?;
        obs::emit_snapshot_restored(id.as_str(), entries);
        Ok(RestoreReport {
            restored: id.clone(),
            safety: safety.id,
            entries,
        })
    }

    /// Drop the oldest scheduled captures beyond the cap. Returns removed ids.
    pub fn rotate(&self) -> SnapshotResult<Vec<SnapshotId>> {
        let Some(cap) = self.rotation_cap else {
            return Ok(Vec::new());
        };
        let scheduled: Vec<SnapshotId> = self
            .list()?
            .into_iter()
            .filter(|info| info.reason == SnapshotReason::Scheduled)
            .map(|info| info.id)
            .collect();
        let excess = scheduled.len().saturating_sub(cap);

        let mut removed = Vec::with_capacity(excess);
        for id in scheduled.into_iter().take(excess) {
            self.remove(&id)?;
            obs::emit_snapshot_rotated(id.as_str());
            removed.push(id);
        }
        Ok(removed)
    }
}

impl Snapshotter for SnapshotManager {
    fn snapshot(&self, reason: SnapshotReason) -> SnapshotResult<SnapshotId> {
        self.take(reason).map(|meta| meta.id)
    }
}
