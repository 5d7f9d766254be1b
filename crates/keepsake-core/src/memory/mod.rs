//! Memory entries, the hierarchical tag index, and the store that keeps
//! them consistent.

pub mod entry;
pub mod error;
pub mod index;
pub mod retention;
pub mod store;
pub mod tags;

pub use entry::{Body, Content, EntryDraft, MemoryEntry, MemoryId, MemoryKind, StoredEntry, Tier, TrustLevel};
pub use error::{AdmissionError, MemoryError, MemoryResult};
pub use index::{TagIndex, TagStats};
pub use retention::{RetentionPolicy, TieringEngine, TieringReport};
pub use store::{MemoryQuery, MemoryStore, PurgeReport, PurgeScope, StoreStats, DEFAULT_QUERY_LIMIT};
pub use tags::{parse_tags, TagPath, MAX_TAG_DEPTH, TAG_SEPARATOR};
