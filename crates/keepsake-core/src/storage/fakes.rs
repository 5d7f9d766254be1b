//! In-memory fakes for the storage traits (testing only)
//!
//! `MemoryCasStore` and `MemoryEntryStore` satisfy the trait contracts without
//! touching the filesystem. Both can be switched into a failing mode to
//! exercise rollback paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::memory::entry::{MemoryId, StoredEntry};

use super::{CasStore, Digest, EntryStore, StorageError, StorageResult};

fn injected_failure() -> StorageError {
    StorageError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "injected write failure",
    ))
}

/// In-memory content-addressed store backed by a `HashMap<digest, bytes>`.
#[derive(Debug, Default)]
pub struct MemoryCasStore {
    blobs: Mutex<HashMap<Digest, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryCasStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `put` calls fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop a blob behind the store's back.
    pub fn forget(&self, digest: &Digest) {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(digest);
    }
}

impl CasStore for MemoryCasStore {
    fn put(&self, data: &[u8]) -> StorageResult<Digest> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(injected_failure());
        }
        let digest = Digest::compute(data);
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(digest, data.to_vec());
        Ok(digest)
    }

    fn get(&self, digest: &Digest) -> StorageResult<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(digest)
            .cloned()
            .ok_or(StorageError::BlobNotFound(*digest))
    }

    fn exists(&self, digest: &Digest) -> StorageResult<bool> {
        Ok(self
            .blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(digest))
    }
}

/// In-memory entry store backed by a `BTreeMap<MemoryId, StoredEntry>`.
#[derive(Debug, Default)]
pub struct MemoryEntryStore {
    records: Mutex<BTreeMap<MemoryId, StoredEntry>>,
    fail_writes: AtomicBool,
    /// Writes still allowed before one injected failure.
    fail_after: Mutex<Option<usize>>,
}

impl MemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `put`/`remove` calls fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Let the next `n` `put`/`remove` calls succeed, fail the one after,
    /// then go back to normal.
    pub fn fail_after(&self, n: usize) {
        *self.fail_after.lock().unwrap_or_else(PoisonError::into_inner) = Some(n);
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn record(&self, id: &MemoryId) -> Option<StoredEntry> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(injected_failure());
        }
        let mut countdown = self.fail_after.lock().unwrap_or_else(PoisonError::into_inner);
        match *countdown {
            Some(0) => {
                *countdown = None;
                Err(injected_failure())
            }
            Some(n) => {
                *countdown = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl EntryStore for MemoryEntryStore {
    fn put(&self, record: &StoredEntry) -> StorageResult<()> {
        self.check_writable()?;
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id, record.clone());
        Ok(())
    }

    fn remove(&self, id: &MemoryId) -> StorageResult<()> {
        self.check_writable()?;
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        Ok(())
    }

    fn load_all(&self) -> StorageResult<Vec<StoredEntry>> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }
}
