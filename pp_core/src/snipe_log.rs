//! Append-only sinks for detected snipes and cycle stats snapshots.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use pp_schema::{CycleStats, SnipeEvent};

pub trait SnipeLog: Send + Sync {
    fn log_snipe(&self, event: &SnipeEvent);
}

pub trait CycleSnapshotSink: Send + Sync {
    fn record_cycle_stats(&self, timestamp: DateTime<Utc>, stats: &CycleStats);
}

/// In-process sink, mostly for tests.
#[derive(Debug, Default)]
pub struct MemorySnipeLog {
    snipes: Mutex<Vec<SnipeEvent>>,
    snapshots: Mutex<Vec<(DateTime<Utc>, CycleStats)>>,
}

impl MemorySnipeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snipes(&self) -> Vec<SnipeEvent> {
        self.snipes
            .lock()
            .map(|snipes| snipes.clone())
            .unwrap_or_default()
    }

    pub fn snapshots(&self) -> Vec<(DateTime<Utc>, CycleStats)> {
        self.snapshots
            .lock()
            .map(|snapshots| snapshots.clone())
            .unwrap_or_default()
    }
}

impl SnipeLog for MemorySnipeLog {
    fn log_snipe(&self, event: &SnipeEvent) {
        if let Ok(mut snipes) = self.snipes.lock() {
            snipes.push(event.clone());
        }
    }
}

impl CycleSnapshotSink for MemorySnipeLog {
    fn record_cycle_stats(&self, timestamp: DateTime<Utc>, stats: &CycleStats) {
        if let Ok(mut snapshots) = self.snapshots.lock() {
            snapshots.push((timestamp, stats.clone()));
        }
    }
}
