//! The memory store: admission, retrieval, and the tag index kept beside it.
//!
//! Entries and the index share one `RwLock`, so a reader never sees an entry
//! without its index registrations or the other way around. When an
//! [`EntryStore`] is attached, every mutation is written through while the
//! lock is held; access bookkeeping (`last_accessed_at`, `access_count`) is
//! batched and persisted by [`MemoryStore::flush`].

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::MemoryConfig;
use crate::metrics::METRICS;
use crate::obs;
use crate::storage::{CasStore, Digest, EntryStore, StorageError, StorageResult};

use super::entry::{Body, Content, EntryDraft, MemoryEntry, MemoryId, MemoryKind, StoredEntry, Tier};
use super::error::{AdmissionError, MemoryError, MemoryResult};
use super::index::{TagIndex, TagStats};
use super::tags::{parse_tags, TagPath};

pub const DEFAULT_QUERY_LIMIT: usize = 10;

/// Filter for [`MemoryStore::query`]. All set fields must match.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryQuery {
    /// Matches entries tagged at this path or any descendant of it.
    pub tag: Option<TagPath>,
    /// Case-insensitive substring of the payload.
    pub text: Option<String>,
    pub kind: Option<MemoryKind>,
    pub limit: usize,
}

impl Default for MemoryQuery {
    fn default() -> Self {
        Self {
            tag: None,
            text: None,
            kind: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl MemoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query rooted at a raw tag path.
    pub fn tagged(raw: &str) -> MemoryResult<Self> {
        let tag = TagPath::parse(raw).map_err(|e| MemoryError::InvalidQuery(e.to_string()))?;
        Ok(Self::default().with_tag(tag))
    }

    pub fn with_tag(mut self, tag: TagPath) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_kind(mut self, kind: MemoryKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Which entries a purge covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeScope {
    All,
    Kind(MemoryKind),
    Ids(BTreeSet<MemoryId>),
}

impl PurgeScope {
    fn covers(&self, record: &StoredEntry) -> bool {
        match self {
            Self::All => true,
            Self::Kind(kind) => record.kind == *kind,
            Self::Ids(ids) => ids.contains(&record.id),
        }
    }
}

impl fmt::Display for PurgeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Kind(kind) => write!(f, "kind:{kind}"),
            Self::Ids(ids) => write!(f, "ids:{}", ids.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub removed: Vec<MemoryId>,
    /// In-scope entries kept because they are `HighLock`.
    pub retained_locked: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total: usize,
    pub locked: usize,
    pub archived: usize,
    pub by_tier: BTreeMap<Tier, usize>,
    pub by_kind: BTreeMap<MemoryKind, usize>,
    pub tags: TagStats,
}

#[derive(Default)]
struct StoreState {
    entries: HashMap<MemoryId, StoredEntry>,
    index: TagIndex,
    /// Ids whose access bookkeeping changed since the last flush.
    dirty: HashSet<MemoryId>,
}

impl StoreState {
    fn insert_record(&mut self, record: StoredEntry) {
        for tag in &record.tags {
            self.index.insert(record.id, tag);
        }
        self.entries.insert(record.id, record);
    }
}

enum Candidates<'a> {
    All,
    Tags(&'a [TagPath], bool),
}

fn touch(record: &mut StoredEntry, now: DateTime<Utc>) {
    record.last_accessed_at = record.last_accessed_at.max(now);
    record.access_count += 1;
}

fn reject(err: AdmissionError) -> MemoryError {
    obs::emit_admission_rejected(&err);
    METRICS.inc_rejected();
    err.into()
}

fn integrity_fault(id: &MemoryId, detail: &str) {
    obs::emit_integrity_fault(&id.to_string(), detail);
    METRICS.inc_integrity_faults();
}

/// Persist `fresh` over `old`, recording which ids were written and which
/// old records were removed so a failure can be undone.
fn write_replacement(
    records: &dyn EntryStore,
    old: &HashMap<MemoryId, StoredEntry>,
    fresh: &HashMap<MemoryId, StoredEntry>,
    written: &mut Vec<MemoryId>,
    dropped: &mut Vec<MemoryId>,
) -> StorageResult<()> {
    for record in fresh.values() {
        records.put(record)?;
        written.push(record.id);
    }
    for id in old.keys().filter(|id| !fresh.contains_key(id)) {
        records.remove(id)?;
        dropped.push(*id);
    }
    Ok(())
}

fn undo_replacement(
    records: &dyn EntryStore,
    old: &HashMap<MemoryId, StoredEntry>,
    written: &[MemoryId],
    dropped: &[MemoryId],
) {
    let restore_old = dropped.iter().filter_map(|id| old.get(id));
    for record in restore_old {
        if let Err(err) = records.put(record) {
            warn!(id = %record.id, error = %err, "failed to put back record after aborted restore");
        }
    }
    for id in written {
        let undone = match old.get(id) {
            Some(record) => records.put(record),
            None => records.remove(id),
        };
        if let Err(err) = undone {
            warn!(id = %id, error = %err, "failed to undo restored record");
        }
    }
}

pub struct MemoryStore {
    state: RwLock<StoreState>,
    min_importance: f64,
    capacity: Option<usize>,
    records: Option<Arc<dyn EntryStore>>,
    archive: Option<Arc<dyn CasStore>>,
}

impl MemoryStore {
    /// Volatile store with no entry persistence and no archive.
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            min_importance: config.min_importance_threshold,
            capacity: config.capacity(),
            records: None,
            archive: None,
        }
    }

    /// Attach the content-addressed archive used for cold payloads.
    pub fn with_archive(mut self, archive: Arc<dyn CasStore>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Open a write-through store, reloading every persisted record and
    /// rebuilding the tag index from them.
    pub fn open(
        config: &MemoryConfig,
        records: Arc<dyn EntryStore>,
        archive: Option<Arc<dyn CasStore>>,
    ) -> MemoryResult<Self> {
        let mut state = StoreState::default();
        for record in records.load_all()? {
            state.insert_record(record);
        }
        info!(entries = state.entries.len(), "memory store opened");

        Ok(Self {
            state: RwLock::new(state),
            min_importance: config.min_importance_threshold,
            capacity: config.capacity(),
            records: Some(records),
            archive,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, record: &StoredEntry) -> MemoryResult<()> {
        if let Some(records) = &self.records {
            records.put(record)?;
        }
        Ok(())
    }

    pub(crate) fn archive(&self) -> Option<Arc<dyn CasStore>> {
        self.archive.clone()
    }

    fn load_content(&self, record: &StoredEntry) -> MemoryResult<Content> {
        match &record.body {
            Body::Resident { content } => Ok(content.clone()),
            Body::Archived { digest } => {
                let archive = self
                    .archive
                    .as_ref()
                    .ok_or(StorageError::BlobNotFound(*digest))?;
                let bytes = archive.get(digest)?;
                Ok(Content::from_bytes(&bytes).map_err(StorageError::from)?)
            }
        }
    }

    pub(crate) fn hydrate_record(&self, record: &StoredEntry) -> MemoryResult<MemoryEntry> {
        Ok(record.hydrate(self.load_content(record)?))
    }

    /// Validate a draft and store it. On any refusal nothing is stored and
    /// no tag is registered.
    pub fn admit(&self, draft: EntryDraft) -> MemoryResult<MemoryEntry> {
        let importance = draft.importance;
        if !importance.is_finite() || !(0.0..=1.0).contains(&importance) {
            return Err(reject(AdmissionError::ImportanceOutOfRange(importance)));
        }
        if importance < self.min_importance {
            return Err(reject(AdmissionError::BelowThreshold {
                importance,
                threshold: self.min_importance,
            }));
        }
        let tags = parse_tags(&draft.tags).map_err(reject)?;

        let now = Utc::now();
        let entry = MemoryEntry {
            id: MemoryId::new(),
            kind: draft.kind,
            content: draft.content,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            tags,
            importance,
            trust_level: draft.trust_level,
            tier: Tier::Hot,
        };
        let record = StoredEntry::resident(entry.clone());

        let mut state = self.write();
        if let Some(max) = self.capacity {
            if state.entries.len() >= max {
                drop(state);
                return Err(reject(AdmissionError::CapacityReached { max }));
            }
        }
        for tag in &entry.tags {
            state.index.insert(entry.id, tag);
        }
        if let Err(err) = self.persist(&record) {
            state.index.remove_all(&entry.id);
            warn!(id = %entry.id, error = %err, "admission rolled back");
            return Err(err);
        }
        state.entries.insert(entry.id, record);
        drop(state);

        obs::emit_memory_admitted(
            &entry.id.to_string(),
            &entry.kind.to_string(),
            entry.tags.len(),
            entry.importance,
        );
        METRICS.inc_admitted();
        Ok(entry)
    }

    pub fn get(&self, id: &MemoryId) -> MemoryResult<MemoryEntry> {
        let record = {
            let mut guard = self.write();
            let state = &mut *guard;
            let record = state
                .entries
                .get_mut(id)
                .ok_or(MemoryError::NotFound { id: *id })?;
            touch(record, Utc::now());
            state.dirty.insert(*id);
            record.clone()
        };
        self.hydrate_record(&record)
    }

    pub fn query(&self, query: &MemoryQuery) -> MemoryResult<Vec<MemoryEntry>> {
        let candidates = match &query.tag {
            Some(tag) => Candidates::Tags(std::slice::from_ref(tag), true),
            None => Candidates::All,
        };
        self.select(candidates, query.text.as_deref(), query.kind, query.limit)
    }

    /// Entries carrying all (`match_all`) or any of the given tag paths,
    /// each matched hierarchically. An empty tag list matches nothing.
    pub fn query_by_tags<S: AsRef<str>>(
        &self,
        tags: &[S],
        match_all: bool,
        limit: usize,
    ) -> MemoryResult<Vec<MemoryEntry>> {
        let paths = tags
            .iter()
            .map(|t| TagPath::parse(t.as_ref()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| MemoryError::InvalidQuery(e.to_string()))?;
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        self.select(Candidates::Tags(&paths, match_all), None, None, limit)
    }

    /// Most recently created entries first.
    pub fn recent(&self, limit: usize) -> MemoryResult<Vec<MemoryEntry>> {
        let mut records: Vec<StoredEntry> = self.read().entries.values().cloned().collect();
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        let mut hits = self.hydrate_ranked(records, None, limit);
        self.touch_all(&mut hits);
        Ok(hits)
    }

    fn select(
        &self,
        candidates: Candidates<'_>,
        text: Option<&str>,
        kind: Option<MemoryKind>,
        limit: usize,
    ) -> MemoryResult<Vec<MemoryEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let needle = text
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty());
        let kind_ok = |record: &StoredEntry| kind.map_or(true, |k| record.kind == k);

        let mut dangling = Vec::new();
        let mut records: Vec<StoredEntry> = {
            let state = self.read();
            match candidates {
                Candidates::All => state
                    .entries
                    .values()
                    .filter(|r| kind_ok(*r))
                    .cloned()
                    .collect(),
                Candidates::Tags(paths, match_all) => {
                    let ids = state.index.resolve_many(paths, match_all);
                    let mut out = Vec::with_capacity(ids.len());
                    for id in ids {
                        match state.entries.get(&id) {
                            Some(record) if kind_ok(record) => out.push(record.clone()),
                            Some(_) => {}
                            None => dangling.push(id),
                        }
                    }
                    out
                }
            }
        };
        if !dangling.is_empty() {
            self.drop_dangling(&dangling);
        }

        records.sort_by(|a, b| {
            b.importance
                .total_cmp(&a.importance)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        let mut hits = self.hydrate_ranked(records, needle.as_deref(), limit);
        self.touch_all(&mut hits);
        Ok(hits)
    }

    /// Hydrate already-ordered records until `limit` pass the text filter.
    fn hydrate_ranked(
        &self,
        records: Vec<StoredEntry>,
        needle: Option<&str>,
        limit: usize,
    ) -> Vec<MemoryEntry> {
        let mut hits = Vec::new();
        for record in records {
            if hits.len() >= limit {
                break;
            }
            let content = match self.load_content(&record) {
                Ok(content) => content,
                Err(err) => {
                    warn!(id = %record.id, error = %err, "skipping entry with unreadable payload");
                    continue;
                }
            };
            if needle.is_some_and(|n| !content.matches_lowercase(n)) {
                continue;
            }
            hits.push(record.hydrate(content));
        }
        hits
    }

    fn touch_all(&self, hits: &mut [MemoryEntry]) {
        if hits.is_empty() {
            return;
        }
        let now = Utc::now();
        let mut guard = self.write();
        let StoreState { entries, dirty, .. } = &mut *guard;
        for hit in hits.iter_mut() {
            if let Some(record) = entries.get_mut(&hit.id) {
                touch(record, now);
                hit.last_accessed_at = record.last_accessed_at;
                hit.access_count = record.access_count;
                dirty.insert(hit.id);
            }
        }
    }

    /// Remove index registrations for ids the store no longer holds.
    fn drop_dangling(&self, ids: &[MemoryId]) {
        let mut state = self.write();
        for id in ids {
            if state.entries.contains_key(id) {
                continue;
            }
            if state.index.remove_all(id) > 0 {
                integrity_fault(id, "index referenced an id missing from the store");
            }
        }
    }

    /// Attach more tags to an existing entry. Tags it already has are ignored.
    pub fn add_tags<S: AsRef<str>>(&self, id: &MemoryId, tags: &[S]) -> MemoryResult<MemoryEntry> {
        let parsed = parse_tags(tags)?;
        let record = {
            let mut guard = self.write();
            let state = &mut *guard;
            let record = state
                .entries
                .get_mut(id)
                .ok_or(MemoryError::NotFound { id: *id })?;
            let fresh: Vec<TagPath> = parsed
                .into_iter()
                .filter(|t| !record.tags.contains(t))
                .collect();
            if !fresh.is_empty() {
                let mut updated = record.clone();
                updated.tags.extend(fresh.iter().cloned());
                for tag in &fresh {
                    state.index.insert(*id, tag);
                }
                if let Err(err) = self.persist(&updated) {
                    for tag in &fresh {
                        state.index.remove(id, tag);
                    }
                    return Err(err);
                }
                *record = updated;
            }
            record.clone()
        };
        self.hydrate_record(&record)
    }

    /// Remove one entry. `HighLock` entries are refused with
    /// [`MemoryError::Locked`]; they can only go through a gated action.
    pub fn delete(&self, id: &MemoryId) -> MemoryResult<()> {
        let mut state = self.write();
        match state.entries.get(id) {
            None => return Err(MemoryError::NotFound { id: *id }),
            Some(record) if record.trust_level.is_locked() => {
                return Err(MemoryError::Locked { id: *id });
            }
            Some(_) => {}
        }
        if let Some(records) = &self.records {
            records.remove(id)?;
        }
        state.entries.remove(id);
        state.index.remove_all(id);
        state.dirty.remove(id);
        drop(state);

        obs::emit_memory_deleted(&id.to_string());
        METRICS.add_deleted(1);
        Ok(())
    }

    /// Remove every in-scope entry, sparing `HighLock` ones unless
    /// `include_locked`. Only the gate's purge action calls this.
    ///
    /// If persistence fails part way, entries already removed stay removed
    /// and the error is returned.
    pub(crate) fn purge(&self, scope: &PurgeScope, include_locked: bool) -> MemoryResult<PurgeReport> {
        let mut guard = self.write();
        let state = &mut *guard;

        let mut retained_locked = 0;
        let mut targets = Vec::new();
        for record in state.entries.values() {
            if !scope.covers(record) {
                continue;
            }
            if record.trust_level.is_locked() && !include_locked {
                retained_locked += 1;
                continue;
            }
            targets.push(record.id);
        }
        targets.sort();

        let mut removed = Vec::with_capacity(targets.len());
        let mut failure = None;
        for id in targets {
            if let Some(records) = &self.records {
                if let Err(err) = records.remove(&id) {
                    failure = Some(err);
                    break;
                }
            }
            state.entries.remove(&id);
            state.index.remove_all(&id);
            state.dirty.remove(&id);
            removed.push(id);
        }
        drop(guard);

        METRICS.add_deleted(removed.len() as u64);
        obs::emit_memories_purged(&scope.to_string(), removed.len(), retained_locked);
        if let Some(err) = failure {
            return Err(err.into());
        }
        Ok(PurgeReport {
            removed,
            retained_locked,
        })
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &MemoryId) -> bool {
        self.read().entries.contains_key(id)
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.read();
        let mut by_tier = BTreeMap::new();
        let mut by_kind = BTreeMap::new();
        let mut locked = 0;
        let mut archived = 0;
        for record in state.entries.values() {
            *by_tier.entry(record.tier).or_insert(0) += 1;
            *by_kind.entry(record.kind).or_insert(0) += 1;
            locked += usize::from(record.trust_level.is_locked());
            archived += usize::from(record.is_archived());
        }
        StoreStats {
            total: state.entries.len(),
            locked,
            archived,
            by_tier,
            by_kind,
            tags: state.index.stats(10),
        }
    }

    /// Every tag path currently in use, sorted.
    pub fn all_tags(&self) -> Vec<TagPath> {
        self.read().index.paths()
    }

    pub fn similar_tags(&self, fragment: &str, max: usize) -> Vec<TagPath> {
        self.read().index.similar(fragment, max)
    }

    pub fn tag_stats(&self, top_n: usize) -> TagStats {
        self.read().index.stats(top_n)
    }

    /// Reconcile the tag index with the entries. Returns repairs made.
    ///
    /// Archived entries whose payload is missing from the archive are
    /// reported as faults but cannot be repaired.
    pub fn check_integrity(&self) -> usize {
        let repaired = self.reconcile_index();
        if let Some(archive) = &self.archive {
            let archived: Vec<(MemoryId, Digest)> = self
                .read()
                .entries
                .values()
                .filter_map(|r| match r.body {
                    Body::Archived { digest } => Some((r.id, digest)),
                    Body::Resident { .. } => None,
                })
                .collect();
            for (id, digest) in archived {
                match archive.exists(&digest) {
                    Ok(true) => {}
                    Ok(false) => integrity_fault(&id, "archived payload missing"),
                    Err(err) => warn!(id = %id, error = %err, "archive check failed"),
                }
            }
        }
        repaired
    }

    fn reconcile_index(&self) -> usize {
        let mut guard = self.write();
        let state = &mut *guard;
        let mut repaired = 0;

        for id in state.index.ids() {
            if !state.entries.contains_key(&id) {
                state.index.remove_all(&id);
                integrity_fault(&id, "dangling index registration removed");
                repaired += 1;
            }
        }
        for record in state.entries.values() {
            let indexed = state.index.paths_of(&record.id);
            for tag in &record.tags {
                if !indexed.contains(tag) {
                    state.index.insert(record.id, tag);
                    integrity_fault(&record.id, "missing index registration restored");
                    repaired += 1;
                }
            }
            for path in indexed {
                if !record.tags.contains(&path) {
                    state.index.remove(&record.id, &path);
                    integrity_fault(&record.id, "stray index registration removed");
                    repaired += 1;
                }
            }
        }
        if repaired == 0 {
            debug!("tag index consistent");
        }
        repaired
    }

    /// Persist pending access bookkeeping. Returns records written.
    pub fn flush(&self) -> MemoryResult<usize> {
        let mut guard = self.write();
        let state = &mut *guard;
        let Some(records) = &self.records else {
            state.dirty.clear();
            return Ok(0);
        };

        let mut pending: Vec<MemoryId> = state.dirty.drain().collect();
        pending.sort();
        for (i, id) in pending.iter().enumerate() {
            let Some(record) = state.entries.get(id) else {
                continue;
            };
            if let Err(err) = records.put(record) {
                state.dirty.extend(pending[i..].iter().copied());
                return Err(err.into());
            }
        }
        Ok(pending.len())
    }

    /// `(id, created_at, tier)` for every entry not yet cold.
    pub(crate) fn placement_candidates(&self) -> Vec<(MemoryId, DateTime<Utc>, Tier)> {
        self.read()
            .entries
            .values()
            .filter(|r| r.tier < Tier::Cold || !r.is_archived())
            .map(|r| (r.id, r.created_at, r.tier))
            .collect()
    }

    pub(crate) fn resident_payload(&self, id: &MemoryId) -> Option<Content> {
        self.read()
            .entries
            .get(id)
            .and_then(|r| r.resident_content().cloned())
    }

    /// Move an entry to `tier`, never backwards, optionally swapping its
    /// payload for an archive digest. Returns whether anything changed.
    pub(crate) fn apply_placement(
        &self,
        id: &MemoryId,
        tier: Tier,
        archived: Option<Digest>,
    ) -> MemoryResult<bool> {
        let mut state = self.write();
        let Some(record) = state.entries.get_mut(id) else {
            return Ok(false);
        };
        let target = tier.max(record.tier);
        let digest = archived.filter(|_| !record.is_archived());
        if target == record.tier && digest.is_none() {
            return Ok(false);
        }

        let mut updated = record.clone();
        updated.tier = target;
        if let Some(digest) = digest {
            updated.body = Body::Archived { digest };
        }
        self.persist(&updated)?;
        *record = updated;
        Ok(true)
    }

    /// Copy of every record, ordered by id, taken under the read lock.
    pub(crate) fn frozen_view(&self) -> Vec<StoredEntry> {
        let mut records: Vec<StoredEntry> = self.read().entries.values().cloned().collect();
        records.sort_by_key(|r| r.id);
        records
    }

    /// Replace the whole contents with `entries`, rebuilding the index.
    /// Cold entries are re-archived when an archive is attached.
    ///
    /// `before_swap` sees the current records, ordered by id, while the write
    /// lock is held, so nothing admitted in between escapes it. If it fails,
    /// or persisting the new records fails, the store is left as it was both
    /// in memory and on disk.
    pub(crate) fn replace_all<T, E>(
        &self,
        entries: Vec<MemoryEntry>,
        before_swap: impl FnOnce(Vec<StoredEntry>) -> Result<T, E>,
    ) -> Result<(usize, T), E>
    where
        E: From<MemoryError>,
    {
        let mut fresh = StoreState::default();
        for entry in entries {
            let record = self.settle(entry)?;
            fresh.insert_record(record);
        }
        let count = fresh.entries.len();

        let mut state = self.write();
        let mut current: Vec<StoredEntry> = state.entries.values().cloned().collect();
        current.sort_by_key(|r| r.id);
        let value = before_swap(current)?;

        if let Some(records) = &self.records {
            let mut written = Vec::new();
            let mut dropped = Vec::new();
            let outcome = write_replacement(
                records.as_ref(),
                &state.entries,
                &fresh.entries,
                &mut written,
                &mut dropped,
            );
            if let Err(err) = outcome {
                undo_replacement(records.as_ref(), &state.entries, &written, &dropped);
                return Err(MemoryError::from(err).into());
            }
        }
        *state = fresh;
        Ok((count, value))
    }

    fn settle(&self, entry: MemoryEntry) -> MemoryResult<StoredEntry> {
        match (&self.archive, entry.tier) {
            (Some(archive), Tier::Cold) => {
                let bytes = entry.content.to_bytes().map_err(StorageError::from)?;
                let digest = archive.put(&bytes)?;
                let mut record = StoredEntry::resident(entry);
                record.body = Body::Archived { digest };
                Ok(record)
            }
            _ => Ok(StoredEntry::resident(entry)),
        }
    }

    #[cfg(test)]
    fn register_stray(&self, id: MemoryId, tag: &TagPath) {
        self.write().index.insert(id, tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::entry::TrustLevel;
    use crate::storage::fakes::{MemoryCasStore, MemoryEntryStore};
    use serde_json::json;

    fn config() -> MemoryConfig {
        MemoryConfig::default()
    }

    fn store() -> MemoryStore {
        MemoryStore::new(&config())
    }

    fn tag(s: &str) -> TagPath {
        TagPath::parse(s).unwrap()
    }

    #[test]
    fn admit_then_get_touches_access() {
        let s = store();
        let e = s
            .admit(EntryDraft::new("first day of school").with_tag("childhood:school"))
            .unwrap();
        assert_eq!(e.access_count, 0);
        assert_eq!(e.tier, Tier::Hot);

        let got = s.get(&e.id).unwrap();
        assert_eq!(got.content, Content::from("first day of school"));
        assert_eq!(got.access_count, 1);
        assert!(got.last_accessed_at >= e.last_accessed_at);
        assert_eq!(s.get(&e.id).unwrap().access_count, 2);
    }

    #[test]
    fn below_threshold_is_rejected() {
        let s = store();
        let err = s
            .admit(EntryDraft::new("noise").with_importance(0.05))
            .unwrap_err();
        assert!(matches!(
            err,
            MemoryError::Admission(AdmissionError::BelowThreshold { .. })
        ));
        assert!(s.is_empty());
    }

    #[test]
    fn out_of_range_importance_is_rejected() {
        let s = store();
        for bad in [1.5, -0.1, f64::NAN, f64::INFINITY] {
            let err = s.admit(EntryDraft::new("x").with_importance(bad)).unwrap_err();
            assert!(matches!(
                err,
                MemoryError::Admission(AdmissionError::ImportanceOutOfRange(_))
            ));
        }
        assert!(s.is_empty());
    }

    #[test]
    fn malformed_tag_registers_nothing() {
        let s = store();
        let err = s
            .admit(EntryDraft::new("x").with_tags(["good:tag", "bad::tag"]))
            .unwrap_err();
        assert!(matches!(
            err,
            MemoryError::Admission(AdmissionError::MalformedTag { .. })
        ));
        assert!(s.all_tags().is_empty());
        assert!(s.is_empty());
    }

    #[test]
    fn capacity_caps_admission_without_eviction() {
        let mut cfg = config();
        cfg.max_memories = 2;
        let s = MemoryStore::new(&cfg);
        let a = s.admit(EntryDraft::new("a")).unwrap();
        s.admit(EntryDraft::new("b")).unwrap();
        let err = s.admit(EntryDraft::new("c")).unwrap_err();
        assert!(matches!(
            err,
            MemoryError::Admission(AdmissionError::CapacityReached { max: 2 })
        ));
        assert!(s.contains(&a.id));

        s.delete(&a.id).unwrap();
        s.admit(EntryDraft::new("c")).unwrap();
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn hierarchical_query_matches_descendants() {
        let s = store();
        let joy = s
            .admit(EntryDraft::new("birthday").with_tag("emotion:joy:early_childhood"))
            .unwrap();
        let calm = s
            .admit(EntryDraft::new("lake").with_tag("emotion:calm"))
            .unwrap();
        s.admit(EntryDraft::new("taxes").with_tag("chores")).unwrap();

        let hits = s.query(&MemoryQuery::tagged("emotion").unwrap()).unwrap();
        let ids: HashSet<MemoryId> = hits.iter().map(|e| e.id).collect();
        assert_eq!(ids, HashSet::from([joy.id, calm.id]));

        let hits = s.query(&MemoryQuery::tagged("Emotion:Joy").unwrap()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, joy.id);

        assert!(s.query(&MemoryQuery::tagged("emotion:anger").unwrap()).unwrap().is_empty());
    }

    #[test]
    fn query_filters_text_and_kind() {
        let s = store();
        s.admit(EntryDraft::new("Pancakes on Sunday").with_kind(MemoryKind::Preference))
            .unwrap();
        s.admit(EntryDraft::new("pancake recipe").with_kind(MemoryKind::Fact))
            .unwrap();
        s.admit(EntryDraft::new(json!({"dish": "PANCAKES"})).with_kind(MemoryKind::Fact))
            .unwrap();

        let all = s.query(&MemoryQuery::new().with_text("pancake")).unwrap();
        assert_eq!(all.len(), 3);
        let facts = s
            .query(&MemoryQuery::new().with_text("PANCAKE").with_kind(MemoryKind::Fact))
            .unwrap();
        assert_eq!(facts.len(), 2);
        assert!(s.query(&MemoryQuery::new().with_text("waffle")).unwrap().is_empty());
    }

    #[test]
    fn results_rank_by_importance_and_respect_limit() {
        let s = store();
        for imp in [0.2, 0.9, 0.5, 0.7] {
            s.admit(EntryDraft::new(format!("i{imp}")).with_importance(imp))
                .unwrap();
        }
        let hits = s.query(&MemoryQuery::new().with_limit(3)).unwrap();
        let imps: Vec<f64> = hits.iter().map(|e| e.importance).collect();
        assert_eq!(imps, vec![0.9, 0.7, 0.5]);
        assert!(s.query(&MemoryQuery::new().with_limit(0)).unwrap().is_empty());
    }

    #[test]
    fn recent_orders_by_creation() {
        let s = store();
        let first = s.admit(EntryDraft::new("first")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = s.admit(EntryDraft::new("second")).unwrap();
        let recent = s.recent(5).unwrap();
        assert_eq!(recent[0].id, second.id);
        assert_eq!(recent[1].id, first.id);
        assert_eq!(s.recent(1).unwrap().len(), 1);
    }

    #[test]
    fn query_by_tags_all_and_any() {
        let s = store();
        let m1 = s.admit(EntryDraft::new("1").with_tags(["tag1", "tag2"])).unwrap();
        let m2 = s.admit(EntryDraft::new("2").with_tags(["tag1", "tag3"])).unwrap();
        s.admit(EntryDraft::new("3").with_tag("tag4")).unwrap();

        let both = s.query_by_tags(&["tag1", "tag2"], true, 10).unwrap();
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].id, m1.id);

        let any = s.query_by_tags(&["tag2", "tag3"], false, 10).unwrap();
        let ids: HashSet<MemoryId> = any.iter().map(|e| e.id).collect();
        assert_eq!(ids, HashSet::from([m1.id, m2.id]));

        let none: &[&str] = &[];
        assert!(s.query_by_tags(none, true, 10).unwrap().is_empty());
        assert!(matches!(
            s.query_by_tags(&["::"], true, 10),
            Err(MemoryError::InvalidQuery(_))
        ));
    }

    #[test]
    fn add_tags_extends_index() {
        let s = store();
        let e = s.admit(EntryDraft::new("x").with_tag("a")).unwrap();
        let updated = s.add_tags(&e.id, &["a", "b:c"]).unwrap();
        assert_eq!(updated.tags, vec![tag("a"), tag("b:c")]);
        assert_eq!(s.query(&MemoryQuery::tagged("b").unwrap()).unwrap().len(), 1);
        assert!(matches!(
            s.add_tags(&MemoryId::new(), &["z"]),
            Err(MemoryError::NotFound { .. })
        ));
    }

    #[test]
    fn delete_removes_entry_and_registrations() {
        let s = store();
        let e = s.admit(EntryDraft::new("x").with_tag("a:b")).unwrap();
        s.delete(&e.id).unwrap();
        assert!(matches!(s.get(&e.id), Err(MemoryError::NotFound { .. })));
        assert!(s.all_tags().is_empty());
        assert!(matches!(s.delete(&e.id), Err(MemoryError::NotFound { .. })));
    }

    #[test]
    fn delete_refuses_locked_entry() {
        let records = Arc::new(MemoryEntryStore::new());
        let s = MemoryStore::open(&config(), records.clone(), None).unwrap();
        let locked = s
            .admit(
                EntryDraft::new("vows")
                    .with_tag("family:wedding")
                    .with_trust(TrustLevel::HighLock),
            )
            .unwrap();

        let err = s.delete(&locked.id).unwrap_err();
        assert!(matches!(err, MemoryError::Locked { id } if id == locked.id));
        assert!(s.contains(&locked.id));
        assert!(records.record(&locked.id).is_some());
        assert_eq!(s.query_by_tags(&["family"], true, 10).unwrap().len(), 1);
    }

    #[test]
    fn failed_persistence_rolls_back_admission() {
        let records = Arc::new(MemoryEntryStore::new());
        let s = MemoryStore::open(&config(), records.clone(), None).unwrap();
        records.fail_writes(true);
        let err = s.admit(EntryDraft::new("x").with_tag("a")).unwrap_err();
        assert!(matches!(err, MemoryError::Storage(_)));
        assert!(s.is_empty());
        assert!(s.all_tags().is_empty());

        records.fail_writes(false);
        let e = s.admit(EntryDraft::new("x").with_tag("a")).unwrap();
        assert!(records.record(&e.id).is_some());
    }

    #[test]
    fn purge_spares_locked_entries() {
        let s = store();
        let locked = s
            .admit(EntryDraft::new("wedding").with_trust(TrustLevel::HighLock))
            .unwrap();
        s.admit(EntryDraft::new("chat").with_kind(MemoryKind::Conversation))
            .unwrap();
        s.admit(EntryDraft::new("fact")).unwrap();

        let report = s.purge(&PurgeScope::Kind(MemoryKind::Conversation), false).unwrap();
        assert_eq!(report.removed.len(), 1);
        assert_eq!(s.len(), 2);

        let report = s.purge(&PurgeScope::Ids(BTreeSet::from([locked.id])), false).unwrap();
        assert!(report.removed.is_empty());
        assert_eq!(report.retained_locked, 1);

        let report = s.purge(&PurgeScope::All, false).unwrap();
        assert_eq!(report.removed.len(), 1);
        assert_eq!(report.retained_locked, 1);
        assert!(s.contains(&locked.id));

        let report = s.purge(&PurgeScope::All, true).unwrap();
        assert_eq!(report.removed, vec![locked.id]);
        assert!(s.is_empty());
    }

    #[test]
    fn query_prunes_dangling_registrations() {
        let s = store();
        s.admit(EntryDraft::new("real").with_tag("a")).unwrap();
        let ghost = MemoryId::new();
        s.register_stray(ghost, &tag("a:ghost"));

        let hits = s.query(&MemoryQuery::tagged("a").unwrap()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(s.all_tags(), vec![tag("a")]);
    }

    #[test]
    fn check_integrity_repairs_both_directions() {
        let s = store();
        let e = s.admit(EntryDraft::new("x").with_tag("a")).unwrap();
        s.register_stray(MemoryId::new(), &tag("ghost"));
        s.register_stray(e.id, &tag("stray"));
        s.write().index.remove(&e.id, &tag("a"));

        assert_eq!(s.check_integrity(), 3);
        assert_eq!(s.all_tags(), vec![tag("a")]);
        assert_eq!(s.check_integrity(), 0);
    }

    #[test]
    fn missing_archive_blob_is_reported_not_repaired() {
        let cas = Arc::new(MemoryCasStore::new());
        let s = store().with_archive(cas.clone());
        let e = s.admit(EntryDraft::new("gone").with_tag("t")).unwrap();
        let digest = cas.put(&Content::from("gone").to_bytes().unwrap()).unwrap();
        s.apply_placement(&e.id, Tier::Cold, Some(digest)).unwrap();
        cas.forget(&digest);

        assert_eq!(s.check_integrity(), 0);
        assert!(matches!(s.get(&e.id), Err(MemoryError::Storage(_))));
        assert!(s.contains(&e.id));
    }

    #[test]
    fn archived_payload_is_hydrated_on_read() {
        let cas = Arc::new(MemoryCasStore::new());
        let s = store().with_archive(cas.clone());
        let e = s.admit(EntryDraft::new("old news").with_tag("news")).unwrap();
        let digest = cas.put(&Content::from("old news").to_bytes().unwrap()).unwrap();
        assert!(s.apply_placement(&e.id, Tier::Cold, Some(digest)).unwrap());
        assert!(!s.apply_placement(&e.id, Tier::Warm, Some(digest)).unwrap());

        let got = s.get(&e.id).unwrap();
        assert_eq!(got.tier, Tier::Cold);
        assert_eq!(got.content, Content::from("old news"));
        assert_eq!(s.stats().archived, 1);

        cas.forget(&digest);
        assert!(matches!(s.get(&e.id), Err(MemoryError::Storage(_))));
        assert!(s.query(&MemoryQuery::new()).unwrap().is_empty());
    }

    #[test]
    fn flush_persists_access_bookkeeping() {
        let records = Arc::new(MemoryEntryStore::new());
        let s = MemoryStore::open(&config(), records.clone(), None).unwrap();
        let e = s.admit(EntryDraft::new("x")).unwrap();
        s.get(&e.id).unwrap();
        s.get(&e.id).unwrap();
        assert_eq!(records.record(&e.id).unwrap().access_count, 0);

        assert_eq!(s.flush().unwrap(), 1);
        assert_eq!(records.record(&e.id).unwrap().access_count, 2);
        assert_eq!(s.flush().unwrap(), 0);
    }

    #[test]
    fn open_rebuilds_index_from_records() {
        let records = Arc::new(MemoryEntryStore::new());
        let first = MemoryStore::open(&config(), records.clone(), None).unwrap();
        let e = first
            .admit(EntryDraft::new("persisted").with_tag("keep:me"))
            .unwrap();
        drop(first);

        let reopened = MemoryStore::open(&config(), records, None).unwrap();
        assert_eq!(reopened.len(), 1);
        let hits = reopened.query(&MemoryQuery::tagged("keep").unwrap()).unwrap();
        assert_eq!(hits[0].id, e.id);
    }

    #[test]
    fn stats_count_tiers_kinds_and_tags() {
        let s = store();
        s.admit(EntryDraft::new("a").with_tag("t").with_trust(TrustLevel::HighLock))
            .unwrap();
        s.admit(EntryDraft::new("b").with_tag("t").with_kind(MemoryKind::Experience))
            .unwrap();
        let stats = s.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.locked, 1);
        assert_eq!(stats.by_tier.get(&Tier::Hot), Some(&2));
        assert_eq!(stats.by_kind.get(&MemoryKind::Experience), Some(&1));
        assert_eq!(stats.tags.popular, vec![(tag("t"), 2)]);
    }
}
