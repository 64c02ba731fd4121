//! Aggregate synchronization statistics.
//!
//! Counters accumulate monotonically and are exposed as a read-only snapshot
//! to the external health probe.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

/// Snapshot of the bridge's cumulative activity.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStats {
    pub total_events: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    /// Mirrors the dispatcher's live pending-set size.
    pub pending_operations: usize,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
}

/// Mutable counter state owned by the orchestrator.
pub struct StatsTracker {
    total_events: u64,
    successful_operations: u64,
    failed_operations: u64,
    last_sync_time: Option<DateTime<Utc>>,
    started_at: Instant,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self {
            total_events: 0,
            successful_operations: 0,
            failed_operations: 0,
            last_sync_time: None,
            started_at: Instant::now(),
        }
    }

    pub fn record_event(&mut self) {
        self.total_events += 1;
        self.last_sync_time = Some(Utc::now());
    }

    pub fn record_success(&mut self) {
        self.successful_operations += 1;
    }

    pub fn record_failure(&mut self) {
        self.failed_operations += 1;
    }

    pub fn snapshot(&self, pending_operations: usize) -> SyncStats {
        SyncStats {
            total_events: self.total_events,
            successful_operations: self.successful_operations,
            failed_operations: self.failed_operations,
            pending_operations,
            last_sync_time: self.last_sync_time,
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_monotonically() {
        let mut tracker = StatsTracker::new();
        tracker.record_event();
        tracker.record_event();
        tracker.record_success();
        tracker.record_failure();

        let stats = tracker.snapshot(4);
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.successful_operations, 1);
        assert_eq!(stats.failed_operations, 1);
        assert_eq!(stats.pending_operations, 4);
        assert!(stats.last_sync_time.is_some());
    }
}
