//! Per-power cycle totals derived from the cached records.

use chrono::{DateTime, Utc};
use pp_schema::{CycleStats, PowerStats, PowerplayRecord, SystemState, Tier};

use crate::cache::{CacheError, StateCache};
use crate::progress::{aggregate_control_points, cycle_decay};
use crate::tick::{cycle_number, last_tick};

/// Control points behind a full acquisition bar.
pub const ACQUISITION_CP_SCALE: f64 = 120_000.0;

fn apply(stats: &mut CycleStats, power: &str, update: impl Fn(&mut PowerStats)) {
    update(stats.power_mut(power));
    update(&mut stats.all_powers);
}

/// Totals for the cycle running at `now`, numbered after the tick that opened it.
pub fn aggregate_cycle_stats(records: &[PowerplayRecord], now: DateTime<Utc>) -> CycleStats {
    let tick = last_tick(now);
    let mut stats = CycleStats::seeded(cycle_number(tick));

    for record in records {
        let this_cycle = record.observed_since(tick);
        match &record.state {
            SystemState::Controlled(control) => {
                let Some(power) = control.power.as_deref() else {
                    continue;
                };
                let progress_cp =
                    aggregate_control_points(control.tier, control.progress.unwrap_or(0.0));
                let population = record.population.unwrap_or(0);
                apply(&mut stats, power, |entry| {
                    entry.systems += 1;
                    match control.tier {
                        Tier::Exploited => entry.exploited += 1,
                        Tier::Fortified => entry.fortified += 1,
                        Tier::Stronghold => entry.stronghold += 1,
                        Tier::Unoccupied => {}
                    }
                    entry.population += population;
                    entry.progress_cp += progress_cp;
                });

                if this_cycle {
                    let reinforcement = control.reinforcement.unwrap_or(0);
                    let undermining = control.undermining.unwrap_or(0);
                    let decay = record.cycle_start.as_ref().map_or(0, cycle_decay);
                    let after_decay = (undermining as i64 - decay).max(0) as u64;
                    apply(&mut stats, power, |entry| {
                        entry.reinforcement_cp += reinforcement;
                        entry.undermining_cp += undermining;
                        entry.undermining_after_decay_cp += after_decay;
                        entry.updated_systems += 1;
                    });
                }
            }
            SystemState::Contested(conflicts) => {
                for conflict in conflicts {
                    let acquisition = (conflict.progress * ACQUISITION_CP_SCALE).floor() as i64;
                    apply(&mut stats, &conflict.power, |entry| {
                        entry.acquisition_cp += acquisition;
                    });
                }

                if this_cycle {
                    let leader = conflicts
                        .iter()
                        .max_by(|a, b| a.progress.total_cmp(&b.progress));
                    if let Some(leader) = leader.filter(|leader| leader.progress >= 1.0) {
                        apply(&mut stats, &leader.power, |entry| {
                            entry.expected_acquisitions += 1;
                        });
                    }
                }
            }
            SystemState::Unoccupied | SystemState::Unreported => {}
        }
    }

    stats
}

pub async fn current_cycle_stats(
    cache: &StateCache,
    now: DateTime<Utc>,
) -> Result<CycleStats, CacheError> {
    let records = cache.scan_all().await?;
    Ok(aggregate_cycle_stats(&records, now))
}
