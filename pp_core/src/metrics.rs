//! Ingest counters, bumped once per frame outcome and read as snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::feed::Rejection;
use crate::pipeline::Outcome;

/// Running ingest counters shared between the pipeline and the reporter task.
#[derive(Debug, Default)]
pub struct IngestMetrics {
    frames: AtomicU64,
    undecodable: AtomicU64,
    foreign_schema: AtomicU64,
    version_mismatch: AtomicU64,
    ignored_event: AtomicU64,
    malformed: AtomicU64,
    stale: AtomicU64,
    regressed: AtomicU64,
    stored: AtomicU64,
    evicted: AtomicU64,
    skipped: AtomicU64,
    snipes: AtomicU64,
    reconnects: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSnapshot {
    pub frames: u64,
    pub undecodable: u64,
    pub foreign_schema: u64,
    pub version_mismatch: u64,
    pub ignored_event: u64,
    pub malformed: u64,
    pub stale: u64,
    pub regressed: u64,
    pub stored: u64,
    pub evicted: u64,
    pub skipped: u64,
    pub snipes: u64,
    pub reconnects: u64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: &Outcome) {
        bump(&self.frames, 1);
        match outcome {
            Outcome::Filtered(rejection) => bump(
                match rejection {
                    Rejection::Undecodable => &self.undecodable,
                    Rejection::ForeignSchema => &self.foreign_schema,
                    Rejection::VersionMismatch => &self.version_mismatch,
                    Rejection::IgnoredEvent => &self.ignored_event,
                    Rejection::Malformed => &self.malformed,
                },
                1,
            ),
            Outcome::Stale => bump(&self.stale, 1),
            Outcome::Regressed => bump(&self.regressed, 1),
            Outcome::Stored { snipes } => {
                bump(&self.stored, 1);
                bump(&self.snipes, *snipes as u64);
            }
            Outcome::Evicted { snipes } => {
                bump(&self.evicted, 1);
                bump(&self.snipes, *snipes as u64);
            }
            Outcome::Skipped { snipes } => {
                bump(&self.skipped, 1);
                bump(&self.snipes, *snipes as u64);
            }
        }
    }

    pub fn record_reconnect(&self) {
        bump(&self.reconnects, 1);
    }

    pub fn snapshot(&self) -> IngestSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        IngestSnapshot {
            frames: load(&self.frames),
            undecodable: load(&self.undecodable),
            foreign_schema: load(&self.foreign_schema),
            version_mismatch: load(&self.version_mismatch),
            ignored_event: load(&self.ignored_event),
            malformed: load(&self.malformed),
            stale: load(&self.stale),
            regressed: load(&self.regressed),
            stored: load(&self.stored),
            evicted: load(&self.evicted),
            skipped: load(&self.skipped),
            snipes: load(&self.snipes),
            reconnects: load(&self.reconnects),
        }
    }
}
