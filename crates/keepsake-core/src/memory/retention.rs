//! Age-based tier migration.
//!
//! Entries move Hot -> Warm -> Cold as they age and never move back. Cold
//! payloads are relocated into the content-addressed archive when one is
//! attached to the store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::metrics::METRICS;
use crate::obs;

use super::entry::Tier;
use super::store::MemoryStore;

/// Age boundaries for tier migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Entries at least this old are Warm.
    pub warm_after_days: u32,
    /// Entries at least this old are Cold.
    pub cold_after_days: u32,
    /// How often the daemon runs a tiering pass.
    pub pass_interval_minutes: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            warm_after_days: 7,
            cold_after_days: 90,
            pass_interval_minutes: 60,
        }
    }
}

impl RetentionPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.warm_after_days == 0 || self.warm_after_days >= self.cold_after_days {
            return Err(format!(
                "expected 0 < warm_after_days ({}) < cold_after_days ({})",
                self.warm_after_days, self.cold_after_days
            ));
        }
        if self.pass_interval_minutes == 0 {
            return Err("pass_interval_minutes must be positive".into());
        }
        Ok(())
    }

    /// Tier an entry created at `created_at` belongs in at `now`.
    pub fn tier_for(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> Tier {
        let age = now - created_at;
        if age >= Duration::days(i64::from(self.cold_after_days)) {
            Tier::Cold
        } else if age >= Duration::days(i64::from(self.warm_after_days)) {
            Tier::Warm
        } else {
            Tier::Hot
        }
    }
}

/// Outcome of one tiering pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TieringReport {
    pub examined: usize,
    /// Entries moved to Warm.
    pub warmed: usize,
    /// Entries moved to Cold.
    pub cooled: usize,
    /// Cold payloads relocated into the archive.
    pub archived: usize,
    /// Entries left where they were because archiving or persisting failed.
    pub failed: usize,
}

impl TieringReport {
    pub fn migrated(&self) -> usize {
        self.warmed + self.cooled
    }
}

pub struct TieringEngine {
    policy: RetentionPolicy,
}

impl TieringEngine {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Migrate every entry whose age puts it in a colder tier.
    ///
    /// Candidates are collected under the read lock, archive writes happen
    /// with no lock held, and each placement is applied under a short write
    /// lock. Running the pass again with the same `now` changes nothing.
    pub fn run_pass(&self, store: &MemoryStore, now: DateTime<Utc>) -> TieringReport {
        let candidates = store.placement_candidates();
        let archive = store.archive();
        let mut report = TieringReport {
            examined: candidates.len(),
            ..TieringReport::default()
        };

        for (id, created_at, current) in candidates {
            let target = self.policy.tier_for(created_at, now).max(current);

            let mut digest = None;
            if let (Tier::Cold, Some(archive)) = (target, archive.as_ref()) {
                if let Some(content) = store.resident_payload(&id) {
                    let stored = content
                        .to_bytes()
                        .map_err(crate::storage::StorageError::from)
                        .and_then(|bytes| archive.put(&bytes));
                    match stored {
                        Ok(d) => digest = Some(d),
                        Err(err) => {
                            warn!(id = %id, error = %err, "archiving cold payload failed");
                            report.failed += 1;
                            continue;
                        }
                    }
                }
            }

            match store.apply_placement(&id, target, digest) {
                Ok(true) => {
                    match (current, target) {
                        (Tier::Hot, Tier::Warm) => report.warmed += 1,
                        (Tier::Hot | Tier::Warm, Tier::Cold) => report.cooled += 1,
                        _ => {}
                    }
                    report.archived += usize::from(digest.is_some());
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(id = %id, error = %err, "tier placement not persisted");
                    report.failed += 1;
                }
            }
        }

        METRICS.add_tier_migrations(report.migrated() as u64);
        obs::emit_tiering_finished(&report);
        report
    }
}
