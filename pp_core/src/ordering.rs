//! Admission of a candidate record against the cached one.

use chrono::{DateTime, Utc};
use pp_schema::{CycleStart, PowerplayRecord};

use crate::progress::ControlSegments;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted { first_of_cycle: bool },
    /// The cache already holds a newer observation.
    Stale,
    /// A counter went backwards within the cycle.
    Regressed,
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted { .. })
    }
}

pub fn admit(
    previous: Option<&PowerplayRecord>,
    candidate: &PowerplayRecord,
    last_tick: DateTime<Utc>,
) -> Admission {
    let Some(previous) = previous else {
        return Admission::Accepted {
            first_of_cycle: true,
        };
    };

    if previous.date > candidate.date {
        return Admission::Stale;
    }

    if !previous.observed_since(last_tick) {
        return Admission::Accepted {
            first_of_cycle: true,
        };
    }

    let counter_regressed = |current: Option<u64>, before: Option<u64>| {
        current.map_or(false, |current| current < before.unwrap_or(0))
    };
    if counter_regressed(candidate.reinforcement(), previous.reinforcement())
        || counter_regressed(candidate.undermining(), previous.undermining())
    {
        return Admission::Regressed;
    }
    if candidate.conflicts().is_some()
        && candidate.conflict_progress_sum() < previous.conflict_progress_sum()
    {
        return Admission::Regressed;
    }

    Admission::Accepted {
        first_of_cycle: false,
    }
}

/// Freezes the cycle-start markers on an admitted candidate.
///
/// `cycle_start` is reconstructed only on the first controlled observation of
/// a cycle and carried unchanged afterwards. `last_cycle_start` is carried
/// within a cycle and dropped across the tick; [`settle_cycle`] sets it.
pub fn stamp_cycle_start(
    previous: Option<&PowerplayRecord>,
    candidate: &mut PowerplayRecord,
    last_tick: DateTime<Utc>,
) {
    let same_cycle = previous.filter(|previous| previous.observed_since(last_tick));

    let reconstructed = candidate
        .control()
        .filter(|control| control.progress.is_some())
        .map(|control| ControlSegments::of(control).cycle_start());
    if let Some(reconstructed) = reconstructed {
        let carried = same_cycle.and_then(|previous| previous.cycle_start);
        candidate.cycle_start = Some(carried.unwrap_or(reconstructed));
    }

    candidate.last_cycle_start = same_cycle.and_then(|current| current.last_cycle_start);
}

/// Records that an end-of-cycle snipe was logged for this cycle by attaching
/// the closing cycle's markers. Later observations this cycle carry them.
pub fn settle_cycle(previous: Option<&PowerplayRecord>, candidate: &mut PowerplayRecord) {
    if candidate.last_cycle_start.is_some() {
        return;
    }
    if let Some(previous) = previous {
        candidate.last_cycle_start = Some(closing_cycle_start(previous));
    }
}

fn closing_cycle_start(previous: &PowerplayRecord) -> CycleStart {
    if let Some(start) = previous.cycle_start {
        return start;
    }
    match previous.control() {
        Some(control) if control.progress.is_some() => ControlSegments::of(control).cycle_start(),
        _ => CycleStart::unoccupied(),
    }
}
