//! Per-frame processing: normalize, admit, stamp, detect, write.
//!
//! Frames are handled strictly one at a time. Each cache mutation is a single
//! store command, so abandoning a frame half way leaves no partial write.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use pp_schema::{PowerplayRecord, Tier};

use crate::cache::StateCache;
use crate::config::{FeedConfig, SnipeThresholds};
use crate::detector::detect_snipes;
use crate::feed::{FeedNormalizer, Rejection};
use crate::metrics::IngestMetrics;
use crate::ordering::{admit, settle_cycle, stamp_cycle_start, Admission};
use crate::snipe_log::SnipeLog;
use crate::tick::last_tick;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Filtered(Rejection),
    Stale,
    Regressed,
    Stored { snipes: usize },
    Evicted { snipes: usize },
    Skipped { snipes: usize },
}

impl Outcome {
    pub fn snipes(&self) -> usize {
        match self {
            Outcome::Stored { snipes } | Outcome::Evicted { snipes } | Outcome::Skipped { snipes } => {
                *snipes
            }
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDecision {
    Store,
    Evict,
    Skip,
}

/// What to do with the cache entry once detection ran.
pub fn decide_write(
    previous: Option<&PowerplayRecord>,
    candidate: &PowerplayRecord,
    snipe_detected: bool,
    last_tick: DateTime<Utc>,
) -> WriteDecision {
    let has_counters = candidate
        .control()
        .map_or(false, |control| {
            control.reinforcement.is_some() && control.undermining.is_some()
        });
    let acquiring = candidate
        .conflicts()
        .map_or(false, |conflicts| conflicts.iter().any(|entry| entry.progress > 0.0));
    if has_counters || acquiring || snipe_detected {
        return WriteDecision::Store;
    }

    let lost_control = previous.map_or(false, |previous| {
        previous.tier().map_or(false, Tier::is_occupied) && !previous.observed_since(last_tick)
    });
    let now_unoccupied = candidate
        .tier()
        .map_or(true, |tier| tier == Tier::Unoccupied);
    if lost_control && now_unoccupied {
        WriteDecision::Evict
    } else {
        WriteDecision::Skip
    }
}

pub struct IngestPipeline {
    normalizer: FeedNormalizer,
    cache: StateCache,
    snipes: Arc<dyn SnipeLog>,
    thresholds: SnipeThresholds,
    metrics: Arc<IngestMetrics>,
}

impl IngestPipeline {
    pub fn new(
        feed: &FeedConfig,
        thresholds: SnipeThresholds,
        cache: StateCache,
        snipes: Arc<dyn SnipeLog>,
    ) -> Self {
        Self {
            normalizer: FeedNormalizer::new(feed),
            cache,
            snipes,
            thresholds,
            metrics: Arc::new(IngestMetrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<IngestMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> Arc<IngestMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn cache(&self) -> &StateCache {
        &self.cache
    }

    pub async fn handle_frame(&mut self, frame: &[u8], now: DateTime<Utc>) -> Outcome {
        match self.normalizer.normalize(frame) {
            Ok(candidate) => self.handle_record(candidate, now).await,
            Err(rejection) => {
                tracing::trace!(
                    target: "powerplay::pipeline",
                    reason = %rejection,
                    "frame.filtered"
                );
                let outcome = Outcome::Filtered(rejection);
                self.metrics.record(&outcome);
                outcome
            }
        }
    }

    pub async fn handle_record(&self, mut candidate: PowerplayRecord, now: DateTime<Utc>) -> Outcome {
        let outcome = self.process(&mut candidate, now).await;
        self.metrics.record(&outcome);
        outcome
    }

    async fn process(&self, candidate: &mut PowerplayRecord, now: DateTime<Utc>) -> Outcome {
        let tick = last_tick(now);
        let previous = self.cache.get(candidate.id64).await;

        match admit(previous.as_ref(), candidate, tick) {
            Admission::Stale => {
                tracing::debug!(
                    target: "powerplay::pipeline",
                    system = %candidate.name,
                    date = %candidate.date,
                    "record.stale"
                );
                return Outcome::Stale;
            }
            Admission::Regressed => {
                tracing::debug!(
                    target: "powerplay::pipeline",
                    system = %candidate.name,
                    "record.regressed"
                );
                return Outcome::Regressed;
            }
            Admission::Accepted { first_of_cycle } => {
                if first_of_cycle {
                    tracing::trace!(
                        target: "powerplay::pipeline",
                        system = %candidate.name,
                        "record.first_of_cycle"
                    );
                }
            }
        }

        stamp_cycle_start(previous.as_ref(), candidate, tick);

        let events = detect_snipes(previous.as_ref(), candidate, tick, &self.thresholds);
        for event in &events {
            tracing::info!(
                target: "powerplay::pipeline",
                system = %event.system,
                category = %event.category,
                power = %event.power,
                amount = event.amount,
                "snipe.detected"
            );
            self.snipes.log_snipe(event);
        }
        let snipes = events.len();
        if events.iter().any(|event| event.category.is_end_of_cycle()) {
            settle_cycle(previous.as_ref(), candidate);
        }

        match decide_write(previous.as_ref(), candidate, snipes > 0, tick) {
            WriteDecision::Store => {
                self.cache.put(candidate).await;
                Outcome::Stored { snipes }
            }
            WriteDecision::Evict => {
                self.cache.delete(candidate.id64).await;
                tracing::debug!(
                    target: "powerplay::pipeline",
                    system = %candidate.name,
                    "record.evicted"
                );
                Outcome::Evicted { snipes }
            }
            WriteDecision::Skip => Outcome::Skipped { snipes },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pp_schema::{ConflictProgress, ControlState, SystemState};

    use crate::snipe_log::MemorySnipeLog;

    fn tick() -> DateTime<Utc> {
        "2026-02-12T07:05:00Z".parse().unwrap()
    }

    fn record(date: &str, state: SystemState) -> PowerplayRecord {
        PowerplayRecord {
            name: "Writer".into(),
            id64: 404,
            date: date.parse().unwrap(),
            powers: None,
            population: None,
            state,
            cycle_start: None,
            last_cycle_start: None,
        }
    }

    fn held(date: &str, counters: Option<(u64, u64)>) -> PowerplayRecord {
        record(
            date,
            SystemState::Controlled(ControlState {
                power: Some("Denton Patreus".into()),
                tier: Tier::Exploited,
                progress: Some(0.3),
                reinforcement: counters.map(|(reinforcement, _)| reinforcement),
                undermining: counters.map(|(_, undermining)| undermining),
            }),
        )
    }

    #[test]
    fn counters_or_progress_keep_a_record() {
        let candidate = held("2026-02-13T10:00:00Z", Some((0, 0)));
        assert_eq!(decide_write(None, &candidate, false, tick()), WriteDecision::Store);

        let bare = held("2026-02-13T10:00:00Z", None);
        assert_eq!(decide_write(None, &bare, false, tick()), WriteDecision::Skip);
        assert_eq!(decide_write(None, &bare, true, tick()), WriteDecision::Store);

        let idle = record("2026-02-13T10:00:00Z", SystemState::Contested(vec![ConflictProgress {
            power: "Yuri Grom".into(),
            progress: 0.0,
        }]));
        assert_eq!(decide_write(None, &idle, false, tick()), WriteDecision::Skip);
    }

    #[test]
    fn lost_control_after_tick_evicts() {
        let previous = held("2026-02-11T10:00:00Z", Some((10, 10)));
        let empty = record("2026-02-13T10:00:00Z", SystemState::Unoccupied);
        assert_eq!(
            decide_write(Some(&previous), &empty, false, tick()),
            WriteDecision::Evict
        );

        let same_cycle = held("2026-02-12T10:00:00Z", Some((10, 10)));
        assert_eq!(
            decide_write(Some(&same_cycle), &empty, false, tick()),
            WriteDecision::Skip
        );
    }

    #[tokio::test]
    async fn pipeline_stores_then_rejects_stale() {
        let log = Arc::new(MemorySnipeLog::new());
        let pipeline = IngestPipeline::new(
            &FeedConfig::default(),
            SnipeThresholds::default(),
            StateCache::in_memory(),
            log.clone(),
        );
        let now = "2026-02-13T12:00:00Z".parse().unwrap();

        let first = held("2026-02-13T10:00:00Z", Some((10, 10)));
        assert_eq!(
            pipeline.handle_record(first, now).await,
            Outcome::Stored { snipes: 0 }
        );
        let cached = pipeline.cache().get(404).await.unwrap();
        assert!(cached.cycle_start.is_some());

        let older = held("2026-02-13T09:00:00Z", Some((20, 20)));
        assert_eq!(pipeline.handle_record(older, now).await, Outcome::Stale);
        assert!(log.snipes().is_empty());
        assert_eq!(pipeline.metrics().snapshot().stale, 1);
    }
}
