//! Persists a copy of the cycle stats shortly before every tick.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;

use crate::cache::StateCache;
use crate::config::SnapshotConfig;
use crate::snipe_log::CycleSnapshotSink;
use crate::stats::current_cycle_stats;
use crate::tick::{next_tick, system_clock, Clock};

/// Capture instant for the cycle running at `now`.
pub fn next_snapshot_at(now: DateTime<Utc>, lead: Duration) -> DateTime<Utc> {
    next_tick(now) - lead
}

pub struct SnapshotScheduler {
    cache: StateCache,
    sink: Arc<dyn CycleSnapshotSink>,
    lead: Duration,
    settle: StdDuration,
    clock: Clock,
}

impl SnapshotScheduler {
    pub fn new(cache: StateCache, sink: Arc<dyn CycleSnapshotSink>, config: &SnapshotConfig) -> Self {
        Self {
            cache,
            sink,
            lead: Duration::minutes(config.lead_minutes),
            settle: StdDuration::from_secs(config.settle_minutes * 60),
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Captures once per cycle until `shutdown` flips to true or its sender goes away.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let now = (self.clock)();
            let at = next_snapshot_at(now, self.lead);
            let wait = (at - now).to_std().unwrap_or(StdDuration::ZERO);
            tracing::debug!(target: "powerplay::snapshot", %at, "snapshot.scheduled");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => break,
            }

            self.capture().await;

            tokio::select! {
                _ = tokio::time::sleep(self.settle) => {}
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!(target: "powerplay::snapshot", "snapshot.stopped");
    }

    pub async fn capture(&self) {
        let now = (self.clock)();
        match current_cycle_stats(&self.cache, now).await {
            Ok(stats) => {
                tracing::info!(
                    target: "powerplay::snapshot",
                    cycle = stats.cycle,
                    systems = stats.all_powers.systems,
                    "snapshot.captured"
                );
                self.sink.record_cycle_stats(now, &stats);
            }
            Err(err) => {
                tracing::warn!(target: "powerplay::snapshot", error = %err, "snapshot.failed");
            }
        }
    }
}
