//! Structured lifecycle events.
//!
//! Every function emits a single event with an `event = "..."` field so log
//! pipelines can filter on it. Warnings and faults go out at `warn!`.

use tracing::{info, warn};

use crate::memory::retention::TieringReport;

/// RAII guard that scopes log lines to one maintenance pass.
pub struct PassSpan {
    _span: tracing::span::EnteredSpan,
}

impl PassSpan {
    pub fn enter(pass: &str) -> Self {
        let span = tracing::info_span!("keepsake.pass", pass = %pass);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_memory_admitted(id: &str, kind: &str, tag_count: usize, importance: f64) {
    info!(
        event = "memory.admitted",
        id = %id,
        kind = %kind,
        tag_count = tag_count,
        importance = importance,
    );
}

pub fn emit_admission_rejected(reason: &dyn std::fmt::Display) {
    info!(event = "memory.admission_rejected", reason = %reason);
}

pub fn emit_memory_deleted(id: &str) {
    info!(event = "memory.deleted", id = %id);
}

pub fn emit_memories_purged(scope: &str, removed: usize, retained_locked: usize) {
    info!(
        event = "memory.purged",
        scope = %scope,
        removed = removed,
        retained_locked = retained_locked,
    );
}

/// The tag index and the store disagreed about an id.
pub fn emit_integrity_fault(id: &str, detail: &str) {
    warn!(event = "index.integrity_fault", id = %id, detail = %detail);
}

pub fn emit_tiering_finished(report: &TieringReport) {
    info!(
        event = "tiering.pass_finished",
        examined = report.examined,
        warmed = report.warmed,
        cooled = report.cooled,
        archived = report.archived,
        failed = report.failed,
    );
}

pub fn emit_snapshot_taken(id: &str, reason: &str, entry_count: usize) {
    info!(
        event = "snapshot.taken",
        id = %id,
        reason = %reason,
        entry_count = entry_count,
    );
}

pub fn emit_snapshot_rotated(id: &str) {
    info!(event = "snapshot.rotated", id = %id);
}

pub fn emit_snapshot_restored(id: &str, entry_count: usize) {
    info!(event = "snapshot.restored", id = %id, entry_count = entry_count);
}

pub fn emit_gate_transition(action: &str, from: &str, to: &str) {
    info!(event = "gate.transition", action = %action, from = %from, to = %to);
}

pub fn emit_gate_executed(action: &str, snapshot: Option<&str>, affected: usize) {
    info!(
        event = "gate.executed",
        action = %action,
        snapshot = snapshot.unwrap_or("none"),
        affected = affected,
    );
}

pub fn emit_gate_cancelled(action: &str, at_state: &str) {
    info!(event = "gate.cancelled", action = %action, at_state = %at_state);
}

pub fn emit_maintenance_error(task: &str, error: &dyn std::fmt::Display) {
    warn!(event = "maintenance.error", task = %task, error = %error);
}
