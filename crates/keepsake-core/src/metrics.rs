//! Process-wide counters for store activity.
//!
//! Incremented at the call site; [`Metrics::flush`] emits all values as one
//! `info!` event, which the daemon does after each maintenance pass.

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    admitted: AtomicU64,
    rejected: AtomicU64,
    deleted: AtomicU64,
    integrity_faults: AtomicU64,
    tier_migrations: AtomicU64,
    snapshots_taken: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            deleted: AtomicU64::new(0),
            integrity_faults: AtomicU64::new(0),
            tier_migrations: AtomicU64::new(0),
            snapshots_taken: AtomicU64::new(0),
        }
    }

    pub fn inc_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "admitted", "counter incremented");
    }

    pub fn inc_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "rejected", "counter incremented");
    }

    /// Deletions and purges both count here, one per entry removed.
    pub fn add_deleted(&self, n: u64) {
        self.deleted.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "deleted", n, "counter incremented");
    }

    pub fn inc_integrity_faults(&self) {
        self.integrity_faults.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "integrity_faults", "counter incremented");
    }

    pub fn add_tier_migrations(&self, n: u64) {
        self.tier_migrations.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "tier_migrations", n, "counter incremented");
    }

    pub fn inc_snapshots(&self) {
        self.snapshots_taken.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "snapshots_taken", "counter incremented");
    }

    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            admitted = self.admitted(),
            rejected = self.rejected(),
            deleted = self.deleted(),
            integrity_faults = self.integrity_faults(),
            tier_migrations = self.tier_migrations(),
            snapshots_taken = self.snapshots_taken(),
        );
    }

    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn deleted(&self) -> u64 {
        self.deleted.load(Ordering::Relaxed)
    }

    pub fn integrity_faults(&self) -> u64 {
        self.integrity_faults.load(Ordering::Relaxed)
    }

    pub fn tier_migrations(&self) -> u64 {
        self.tier_migrations.load(Ordering::Relaxed)
    }

    pub fn snapshots_taken(&self) -> u64 {
        self.snapshots_taken.load(Ordering::Relaxed)
    }

    /// Zero every counter (tests).
    pub fn reset(&self) {
        for counter in [
            &self.admitted,
            &self.rejected,
            &self.deleted,
            &self.integrity_faults,
            &self.tier_migrations,
            &self.snapshots_taken,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
