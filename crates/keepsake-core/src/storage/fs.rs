use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::memory::entry::{MemoryId, StoredEntry};

use super::{CasStore, Digest, EntryStore, StorageError, StorageResult};

/// Write `data` to `path` through a temp file in the same directory, then rename.
pub(crate) fn write_atomic(dir: &Path, path: &Path, data: &[u8]) -> StorageResult<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Cold payload archive on disk.
///
/// Layout: `<root>/archive/<2 hex chars>/<62 hex chars>`
pub struct FsCasStore {
    archive_dir: PathBuf,
}

impl FsCasStore {
    /// Open the archive under `root`, creating `root/archive/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let archive_dir = root.as_ref().join("archive");
        fs::create_dir_all(&archive_dir)?;
        Ok(Self { archive_dir })
    }

    fn locate(&self, digest: &Digest) -> (PathBuf, PathBuf) {
        let (shard, file) = digest.shard();
        let dir = self.archive_dir.join(shard);
        let path = dir.join(file);
        (dir, path)
    }
}

impl CasStore for FsCasStore {
    fn put(&self, data: &[u8]) -> StorageResult<Digest> {
        let digest = Digest::compute(data);
        let (dir, path) = self.locate(&digest);
        if !path.exists() {
            fs::create_dir_all(&dir)?;
            write_atomic(&dir, &path, data)?;
        }
        Ok(digest)
    }

    fn get(&self, digest: &Digest) -> StorageResult<Vec<u8>> {
        let (_, path) = self.locate(digest);
        match fs::read(path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::BlobNotFound(*digest))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, digest: &Digest) -> StorageResult<bool> {
        Ok(self.locate(digest).1.is_file())
    }
}

/// One JSON file per entry.
///
/// Layout: `<root>/entries/<id>.json`
pub struct FsEntryStore {
    entries_dir: PathBuf,
}

impl FsEntryStore {
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let entries_dir = root.as_ref().join("entries");
        fs::create_dir_all(&entries_dir)?;
        Ok(Self { entries_dir })
    }

    fn record_path(&self, id: &MemoryId) -> PathBuf {
        self.entries_dir.join(format!("{id}.json"))
    }

    fn record_files(&self) -> StorageResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for dirent in fs::read_dir(&self.entries_dir)? {
            let path = dirent?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl EntryStore for FsEntryStore {
    fn put(&self, record: &StoredEntry) -> StorageResult<()> {
        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.entries_dir, &self.record_path(&record.id), &json)
    }

    fn remove(&self, id: &MemoryId) -> StorageResult<()> {
        match fs::remove_file(self.record_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn load_all(&self) -> StorageResult<Vec<StoredEntry>> {
        let mut records = Vec::new();
        for path in self.record_files()? {
            let bytes = fs::read(&path)?;
            let record: StoredEntry =
                serde_json::from_slice(&bytes).map_err(|e| StorageError::CorruptRecord {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            records.push(record);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::entry::{Body, Content, MemoryKind, Tier, TrustLevel};
    use chrono::Utc;

    fn make_cas() -> (tempfile::TempDir, FsCasStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCasStore::new(dir.path()).unwrap();
        (dir, store)
    }

    fn record(text: &str) -> StoredEntry {
        let now = Utc::now();
        StoredEntry {
            id: MemoryId::new(),
            kind: MemoryKind::Fact,
            body: Body::Resident {
                content: Content::from(text),
            },
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            tags: Vec::new(),
            importance: 0.5,
            trust_level: TrustLevel::Low,
            tier: Tier::Hot,
        }
    }

    #[test]
    fn archived_payload_reads_back() {
        let (_dir, store) = make_cas();
        let digest = store.put(b"hello world").unwrap();
        assert_eq!(store.get(&digest).unwrap(), b"hello world");
        assert!(store.exists(&digest).unwrap());
    }

    #[test]
    fn identical_payloads_share_one_file() {
        let (dir, store) = make_cas();
        let d1 = store.put(b"duplicate me").unwrap();
        let d2 = store.put(b"duplicate me").unwrap();
        assert_eq!(d1, d2);

        let hex = d1.to_hex();
        let shard = dir.path().join("archive").join(&hex[..2]);
        let entries: Vec<_> = std::fs::read_dir(shard).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn missing_payload_is_blob_not_found() {
        let (_dir, store) = make_cas();
        let fake = Digest::compute(b"no such blob");
        match store.get(&fake) {
            Err(StorageError::BlobNotFound(d)) => assert_eq!(d, fake),
            other => panic!("expected BlobNotFound, got {other:?}"),
        }
        assert!(!store.exists(&fake).unwrap());
    }

    #[test]
    fn entry_store_put_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsEntryStore::new(dir.path()).unwrap();
        let a = record("a");
        let b = record("b");
        store.put(&a).unwrap();
        store.put(&b).unwrap();
        assert_eq!(store.load_all().unwrap().len(), 2);

        store.remove(&a.id).unwrap();
        store.remove(&a.id).unwrap();
        let left = store.load_all().unwrap();
        assert_eq!(left, vec![b]);
    }

    #[test]
    fn entry_store_put_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsEntryStore::new(dir.path()).unwrap();
        let mut a = record("a");
        store.put(&a).unwrap();
        a.access_count = 9;
        store.put(&a).unwrap();
        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].access_count, 9);
    }

    #[test]
    fn entry_store_rejects_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsEntryStore::new(dir.path()).unwrap();
        store.put(&record("x")).unwrap();

        std::fs::write(dir.path().join("entries").join("junk.json"), b"{not json").unwrap();
        assert!(matches!(
            store.load_all(),
            Err(StorageError::CorruptRecord { .. })
        ));
    }
}
