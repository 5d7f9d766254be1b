//! Background maintenance: scheduled backups and tiering passes.
//!
//! Store and snapshot work is synchronous and touches the filesystem, so each
//! tick hands it to the blocking pool. The loop ends when the shutdown
//! channel flips to `true` (or its sender is dropped); pending access
//! bookkeeping is then flushed and an emergency capture taken.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::metrics::METRICS;
use crate::obs::{self, PassSpan};
use crate::snapshot::SnapshotId;
use crate::system::MemorySystem;

/// What the scheduler did before it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceSummary {
    pub backups: usize,
    pub tiering_passes: usize,
    pub failures: usize,
    /// Emergency capture taken at shutdown, if it succeeded.
    pub final_snapshot: Option<SnapshotId>,
}

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(60))
}

pub async fn run_scheduled(
    system: Arc<MemorySystem>,
    mut shutdown: watch::Receiver<bool>,
) -> MaintenanceSummary {
    let memory = &system.config().memory;
    let backups_enabled = memory.auto_backup.enabled;
    let backup_every = minutes(memory.auto_backup.interval_minutes);
    let tier_every = minutes(memory.retention_policy.pass_interval_minutes);

    let mut backup_tick = interval_at(Instant::now() + backup_every, backup_every);
    backup_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tier_tick = interval_at(Instant::now() + tier_every, tier_every);
    tier_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        backups_enabled,
        backup_every_secs = backup_every.as_secs(),
        tier_every_secs = tier_every.as_secs(),
        "maintenance scheduler started"
    );

    let mut summary = MaintenanceSummary::default();
    while !*shutdown.borrow() {
        tokio::select! {
            _ = backup_tick.tick(), if backups_enabled => {
                let sys = system.clone();
                let taken = tokio::task::spawn_blocking(move || {
                    let _span = PassSpan::enter("backup");
                    sys.scheduled_backup()
                })
                .await;
                match taken {
                    Ok(Ok(meta)) => {
                        debug!(snapshot = %meta.id, "scheduled backup done");
                        summary.backups += 1;
                    }
                    Ok(Err(err)) => {
                        obs::emit_maintenance_error("backup", &err);
                        summary.failures += 1;
                    }
                    Err(join) => {
                        obs::emit_maintenance_error("backup", &join);
                        summary.failures += 1;
                    }
                }
                METRICS.flush();
            }
            _ = tier_tick.tick() => {
                let sys = system.clone();
                let passed = tokio::task::spawn_blocking(move || {
                    let _span = PassSpan::enter("tiering");
                    sys.run_tiering(Utc::now())
                })
                .await;
                match passed {
                    Ok(report) => {
                        summary.tiering_passes += 1;
                        summary.failures += report.failed;
                    }
                    Err(join) => {
                        obs::emit_maintenance_error("tiering", &join);
                        summary.failures += 1;
                    }
                }
                METRICS.flush();
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!("maintenance scheduler stopping");
    let sys = system.clone();
    match tokio::task::spawn_blocking(move || sys.shutdown()).await {
        Ok(Ok(id)) => summary.final_snapshot = Some(id),
        Ok(Err(err)) => {
            obs::emit_maintenance_error("shutdown", &err);
            summary.failures += 1;
        }
        Err(join) => {
            obs::emit_maintenance_error("shutdown", &join);
            summary.failures += 1;
        }
    }
    METRICS.flush();
    summary
}
