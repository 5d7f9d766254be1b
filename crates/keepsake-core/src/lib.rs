//! Keepsake Core Library
//!
//! A tag-indexed memory store for a conversational companion: admission with
//! an importance threshold, hierarchical tag lookup, age-based tiering,
//! rotating snapshots, and a multi-step gate in front of destructive actions.

pub mod config;
pub mod gate;
pub mod maintenance;
pub mod memory;
pub mod metrics;
pub mod obs;
pub mod snapshot;
pub mod storage;
pub mod system;
pub mod telemetry;

pub use config::{
    AutoBackupConfig, ConfigError, ConfigResult, KeepsakeConfig, MemoryConfig,
    DEFAULT_CONFIG_FILE,
};

pub use gate::{
    ActionContext, ActionError, ActionKind, ActionOutcome, ActionRequirement, BoundAction,
    ConfirmationError, DeleteAction, DestructiveGate, ExportAction, ExportDocument, GateError,
    GateObserver, GatePayload, GateReport, GateResult, GateState, NullObserver, PurgeAction,
};

pub use memory::{
    parse_tags, AdmissionError, Content, EntryDraft, MemoryEntry, MemoryError, MemoryId,
    MemoryKind, MemoryQuery, MemoryResult, MemoryStore, RetentionPolicy, StoreStats, TagIndex,
    TagPath, TagStats, Tier, TieringEngine, TieringReport, TrustLevel, DEFAULT_QUERY_LIMIT,
    MAX_TAG_DEPTH,
};

pub use snapshot::{
    RestoreReport, SnapshotDocument, SnapshotError, SnapshotId, SnapshotInfo, SnapshotManager,
    SnapshotMeta, SnapshotReason, SnapshotResult, Snapshotter,
};

pub use storage::fs::{FsCasStore, FsEntryStore};
pub use storage::{CasStore, Digest, EntryStore, StorageError};

pub use maintenance::{run_scheduled, MaintenanceSummary};
pub use system::{ActionRequest, MemorySystem, SystemError, SystemResult};

pub use metrics::METRICS;
pub use telemetry::init_tracing;

/// Keepsake version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
