//! Periodic maintenance tasks.
//!
//! Run by the server on every maintenance tick (default: 1 hour). All
//! operations are idempotent, so running them more often is harmless.
//!
//! # Tasks
//!
//! 1. **Skipped-key GC**: drop cached message keys older than the retention
//!    window (default: 24 hours)
//! 2. **Write-behind flush**: rewrite sessions and groups whose last commit
//!    failed
//!
//! A failed flush is logged and retried on the next tick; it never stops the
//! remaining tasks.

use quorum_core::{Environment, GroupSessionManager, SecureChannelEngine, Storage};
use tracing::{debug, warn};

/// Summary of a maintenance run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Skipped message keys removed by GC.
    pub skipped_keys_purged: usize,
    /// Sessions rewritten by the flush.
    pub sessions_flushed: usize,
    /// Groups rewritten by the flush.
    pub groups_flushed: usize,
    /// Sessions and groups still waiting for a successful write.
    pub still_dirty: usize,
}

impl MaintenanceReport {
    /// Whether every pending write reached storage.
    pub fn is_clean(&self) -> bool {
        self.still_dirty == 0
    }
}

/// Run every maintenance task once.
pub fn run_maintenance<E: Environment, S: Storage>(
    engine: &SecureChannelEngine<E, S>,
    groups: &GroupSessionManager<E, S>,
) -> MaintenanceReport {
    let mut report = MaintenanceReport {
        skipped_keys_purged: engine.collect_garbage(),
        ..MaintenanceReport::default()
    };

    match engine.flush() {
        Ok(flushed) => report.sessions_flushed = flushed,
        Err(error) => warn!(%error, "Session flush failed, retrying next tick"),
    }
    match groups.flush() {
        Ok(flushed) => report.groups_flushed = flushed,
        Err(error) => warn!(%error, "Group flush failed, retrying next tick"),
    }
    report.still_dirty = engine.dirty_sessions() + groups.dirty_groups();

    debug!(
        purged = report.skipped_keys_purged,
        sessions = report.sessions_flushed,
        groups = report.groups_flushed,
        dirty = report.still_dirty,
        "Maintenance completed"
    );

    report
}
