//! Storage backends for Keepsake.
//!
//! Two abstractions live here:
//! - `CasStore`: content-addressed blobs (put/get by SHA-256 digest). Cold-tier
//!   payloads are relocated here.
//! - `EntryStore`: the addressable store of entry records keyed by id.
//!
//! Filesystem implementations are in `fs`; in-memory fakes for tests in `fakes`.

pub mod fakes;
pub mod fs;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as Sha2Digest, Sha256};
use thiserror::Error;

use crate::memory::entry::{MemoryId, StoredEntry};

/// Content address of an archived payload: the SHA-256 of its bytes.
///
/// Serialized as 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest([u8; 32]);

impl Digest {
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Shard directory and file name inside an archive root.
    pub(crate) fn shard(&self) -> (String, String) {
        let hex = self.to_hex();
        let (dir, rest) = hex.split_at(2);
        (dir.to_string(), rest.to_string())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "Digest({}..)", &hex[..12])
    }
}

impl FromStr for Digest {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StorageError::InvalidDigest(s.to_string());
        let bytes = hex::decode(s).map_err(|_| invalid())?;
        bytes.try_into().map(Self).map_err(|_| invalid())
    }
}

impl TryFrom<String> for Digest {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.to_hex()
    }
}

/// Errors from storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob not found: {0}")]
    BlobNotFound(Digest),

    #[error("invalid digest hex: {0}")]
    InvalidDigest(String),

    #[error("corrupt entry record {path}: {reason}")]
    CorruptRecord { path: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Archive of immutable payloads addressed by their digest.
pub trait CasStore: Send + Sync {
    /// Store `data`. Storing the same bytes twice is a no-op.
    fn put(&self, data: &[u8]) -> StorageResult<Digest>;

    fn get(&self, digest: &Digest) -> StorageResult<Vec<u8>>;

    fn exists(&self, digest: &Digest) -> StorageResult<bool>;
}

/// Durable store of entry records keyed by id.
///
/// Guarantees:
/// - `put` replaces any previous record with the same id.
/// - `load_all` returns exactly the records put and not removed since.
pub trait EntryStore: Send + Sync {
    fn put(&self, record: &StoredEntry) -> StorageResult<()>;

    /// Remove a record. No-op if absent.
    fn remove(&self, id: &MemoryId) -> StorageResult<()>;

    fn load_all(&self) -> StorageResult<Vec<StoredEntry>>;
}
