//! Read-side filter for systems worth a look on the alert map.

use chrono::{DateTime, Duration, Utc};
use pp_schema::PowerplayRecord;

use crate::cache::{CacheError, StateCache};
use crate::progress::cycle_decay;
use crate::tick::last_tick;

pub const ALERT_WINDOW_HOURS: i64 = 48;
pub const ALERT_MIN_ACTIVITY: i64 = 10_000;
pub const ALERT_MIN_ACQUISITION: f64 = 0.3;

/// Oldest observation still shown: two days back, or the last tick if that is earlier.
pub fn alert_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    (now - Duration::hours(ALERT_WINDOW_HOURS)).min(last_tick(now))
}

pub fn is_alert(record: &PowerplayRecord, cutoff: DateTime<Utc>) -> bool {
    if record.date < cutoff {
        return false;
    }

    if let Some(control) = record.control() {
        if let (Some(progress), Some(reinforcement), Some(undermining)) =
            (control.progress, control.reinforcement, control.undermining)
        {
            if progress < 0.0 {
                return true;
            }
            // Decay only applies inside the bar. It comes from the frozen
            // cycle start because a capped record no longer rebuilds it.
            let decay = if progress > 0.0 && progress < 1.0 {
                record.cycle_start.as_ref().map_or(0, cycle_decay)
            } else {
                0
            };
            let activity = reinforcement as i64 + (undermining as i64 - decay);
            if activity >= ALERT_MIN_ACTIVITY {
                return true;
            }
        }
    }

    record.conflicts().map_or(false, |conflicts| {
        conflicts
            .iter()
            .any(|entry| entry.progress >= ALERT_MIN_ACQUISITION)
    })
}

/// Alerting records, newest first.
pub async fn list_alerts(
    cache: &StateCache,
    now: DateTime<Utc>,
) -> Result<Vec<PowerplayRecord>, CacheError> {
    let cutoff = alert_cutoff(now);
    let mut alerts = cache
        .scan_matching(|record| is_alert(record, cutoff))
        .await?;
    alerts.sort_by(|a, b| b.date.cmp(&a.date));
    Ok(alerts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pp_schema::{ConflictProgress, ControlState, CycleStart, SystemState, Tier};

    fn at(value: &str) -> DateTime<Utc> {
        value.parse().unwrap()
    }

    fn held(date: &str, progress: f64, reinforcement: u64, undermining: u64) -> PowerplayRecord {
        PowerplayRecord {
            name: "Alerted".into(),
            id64: 3,
            date: at(date),
            powers: None,
            population: None,
            state: SystemState::Controlled(ControlState {
                power: Some("Aisling Duval".into()),
                tier: Tier::Stronghold,
                progress: Some(progress),
                reinforcement: Some(reinforcement),
                undermining: Some(undermining),
            }),
            cycle_start: Some(CycleStart {
                start_progress: 1.0,
                start_bar: 1.0,
                start_tier: Tier::Stronghold,
            }),
            last_cycle_start: None,
        }
    }

    #[test]
    fn cutoff_reaches_back_to_the_tick() {
        // Monday: the tick is further back than 48 hours.
        assert_eq!(alert_cutoff(at("2026-02-16T12:00:00Z")), at("2026-02-12T07:05:00Z"));
        // Friday morning: 48 hours reaches past the tick.
        assert_eq!(alert_cutoff(at("2026-02-13T12:00:00Z")), at("2026-02-11T12:00:00Z"));
    }

    #[test]
    fn activity_is_net_of_decay_inside_the_bar() {
        let cutoff = at("2026-02-12T07:05:00Z");
        assert!(is_alert(&held("2026-02-13T10:00:00Z", 1.0, 0, 12_000), cutoff));
        // At 0.9 the cycle-start decay (156250) swallows the undermining.
        assert!(!is_alert(&held("2026-02-13T10:00:00Z", 0.9, 0, 12_000), cutoff));
        assert!(is_alert(&held("2026-02-13T10:00:00Z", 0.9, 170_000, 0), cutoff));
        assert!(is_alert(&held("2026-02-13T10:00:00Z", -0.1, 0, 0), cutoff));
        assert!(!is_alert(&held("2026-02-10T10:00:00Z", 1.0, 0, 50_000), cutoff));
    }

    #[test]
    fn decay_follows_the_frozen_cycle_start() {
        let cutoff = at("2026-02-12T07:05:00Z");
        let mut record = held("2026-02-13T10:00:00Z", 0.9, 0, 30_000);
        // Started the cycle at 0.3 of Stronghold: 10416 of it is decay.
        record.cycle_start = Some(CycleStart {
            start_progress: 0.3,
            start_bar: 0.825,
            start_tier: Tier::Stronghold,
        });
        assert!(is_alert(&record, cutoff));

        // Started at 0.9: decay alone outweighs the undermining.
        record.cycle_start = Some(CycleStart {
            start_progress: 0.9,
            start_bar: 0.975,
            start_tier: Tier::Stronghold,
        });
        assert!(!is_alert(&record, cutoff));

        // Capped progress never subtracts decay.
        let capped = held("2026-02-13T10:00:00Z", 1.0, 0, 30_000);
        assert!(is_alert(&capped, cutoff));
    }

    #[tokio::test]
    async fn lists_contested_and_active_systems() {
        let cache = StateCache::in_memory();
        let mut contested = held("2026-02-13T11:00:00Z", 0.0, 0, 0);
        contested.id64 = 4;
        contested.state = SystemState::Contested(vec![ConflictProgress {
            power: "Jerome Archer".into(),
            progress: 0.35,
        }]);
        let mut quiet = held("2026-02-13T09:00:00Z", 0.5, 10, 10);
        quiet.id64 = 5;
        cache.put(&held("2026-02-13T10:00:00Z", 1.0, 20_000, 0)).await;
        cache.put(&contested).await;
        cache.put(&quiet).await;

        let alerts = list_alerts(&cache, at("2026-02-13T12:00:00Z")).await.unwrap();
        let ids: Vec<u64> = alerts.iter().map(|record| record.id64).collect();
        assert_eq!(ids, vec![4, 3]);
    }
}
