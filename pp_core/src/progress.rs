//! Numeric model of the Powerplay control bar.
//!
//! The in-game bar is split into four equal segments (one per tier) even though
//! the tiers span very different amounts of control points. Two conventions
//! for where a tier starts exist and both are load-bearing:
//!
//! * [`bar_scale`] places Unoccupied below Exploited on the galaxy-map bar and
//!   is what cycle-start reconstruction and the detector use.
//! * [`aggregate_scale`] starts Exploited at zero and is what the cycle stats
//!   totals are summed in.

use pp_schema::{ControlState, CycleStart, Tier};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierScale {
    pub start: f64,
    pub range: f64,
}

const STRONGHOLD_BAR_START: f64 = 1_350_000.0;
const FORTIFIED_BAR_START: f64 = 700_000.0;
const EXPLOITED_BAR_START: f64 = 350_000.0;

/// Upper bound for aggregate control points (a maxed Stronghold).
pub const AGGREGATE_CP_MAX: i64 = 2_000_000;

/// Tier offsets on the galaxy-map control bar.
pub fn bar_scale(tier: Tier) -> TierScale {
    match tier {
        Tier::Unoccupied => TierScale {
            start: 0.0,
            range: 350_000.0,
        },
        Tier::Exploited => TierScale {
            start: EXPLOITED_BAR_START,
            range: 350_000.0,
        },
        Tier::Fortified => TierScale {
            start: FORTIFIED_BAR_START,
            range: 650_000.0,
        },
        Tier::Stronghold => TierScale {
            start: STRONGHOLD_BAR_START,
            range: 1_000_000.0,
        },
    }
}

/// Tier offsets used when summing control progress into cycle stats.
pub fn aggregate_scale(tier: Tier) -> TierScale {
    match tier {
        Tier::Unoccupied => TierScale {
            start: 0.0,
            range: 0.0,
        },
        Tier::Exploited => TierScale {
            start: 0.0,
            range: 350_000.0,
        },
        Tier::Fortified => TierScale {
            start: 350_000.0,
            range: 650_000.0,
        },
        Tier::Stronghold => TierScale {
            start: 1_000_000.0,
            range: 1_000_000.0,
        },
    }
}

/// Control points spanned by one full tier segment.
pub fn tier_range(tier: Tier) -> f64 {
    bar_scale(tier).range
}

/// Absolute control points on the bar scale.
pub fn control_points(tier: Tier, progress: f64) -> i64 {
    let scale = bar_scale(tier);
    (scale.start + progress * scale.range).round() as i64
}

/// Control points on the aggregate scale, clamped to `[0, AGGREGATE_CP_MAX]`.
pub fn aggregate_control_points(tier: Tier, progress: f64) -> i64 {
    let scale = aggregate_scale(tier);
    let cp = (scale.start + progress * scale.range).round() as i64;
    cp.clamp(0, AGGREGATE_CP_MAX)
}

/// Normalized bar position in `[0, 1]`; every quarter is one tier.
pub fn bar_position(cp: i64) -> f64 {
    let cp = cp as f64;
    if cp >= STRONGHOLD_BAR_START {
        (0.75 + (cp - STRONGHOLD_BAR_START) / 1_000_000.0 * 0.25).min(1.0)
    } else if cp >= FORTIFIED_BAR_START {
        0.5 + (cp - FORTIFIED_BAR_START) / 650_000.0 * 0.25
    } else if cp >= EXPLOITED_BAR_START {
        0.25 + (cp - EXPLOITED_BAR_START) / 350_000.0 * 0.25
    } else {
        (cp / 350_000.0 * 0.25).max(0.0)
    }
}

pub fn tier_for_control_points(cp: i64) -> Tier {
    let cp = cp as f64;
    if cp >= STRONGHOLD_BAR_START {
        Tier::Stronghold
    } else if cp >= FORTIFIED_BAR_START {
        Tier::Fortified
    } else if cp >= EXPLOITED_BAR_START {
        Tier::Exploited
    } else {
        Tier::Unoccupied
    }
}

/// Progress inside whichever segment the bar position falls in.
pub fn segment_progress(bar: f64) -> f64 {
    if bar >= 1.0 {
        1.0
    } else {
        (bar % 0.25) / 0.25
    }
}

/// Bar markers derived from one control observation.
///
/// The start values are reverse-calculated from this cycle's reinforcement and
/// undermining; they drift once progress is capped, which is why the first
/// observation of a cycle freezes them into a [`CycleStart`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlSegments {
    pub total_cp: i64,
    pub current_bar: f64,
    pub current_progress: f64,
    pub current_tier: Tier,
    /// Like `current_progress` but negative when the journal reports a tier drop.
    pub adjusted_progress: f64,
    pub start_bar: f64,
    pub start_progress: f64,
    pub start_tier: Tier,
}

impl ControlSegments {
    pub fn of(control: &ControlState) -> Self {
        let reported = control.progress.unwrap_or(0.0);
        let total_cp = control_points(control.tier, reported);
        let cycle_start_cp = total_cp - control.reinforcement.unwrap_or(0) as i64
            + control.undermining.unwrap_or(0) as i64;

        let current_bar = bar_position(total_cp);
        let start_bar = bar_position(cycle_start_cp);
        let current_progress = segment_progress(current_bar);
        let adjusted_progress = if reported < 0.0 {
            -(1.0 - current_progress)
        } else {
            current_progress
        };

        Self {
            total_cp,
            current_bar,
            current_progress,
            current_tier: tier_for_control_points(total_cp),
            adjusted_progress,
            start_bar,
            start_progress: segment_progress(start_bar),
            start_tier: tier_for_control_points(cycle_start_cp),
        }
    }

    pub fn cycle_start(&self) -> CycleStart {
        CycleStart {
            start_progress: self.start_progress,
            start_bar: self.start_bar,
            start_tier: self.start_tier,
        }
    }
}

fn decay_modifier(tier: Tier) -> f64 {
    match tier {
        Tier::Stronghold => 50.0 / 240.0,
        Tier::Fortified => 41.0 / 240.0,
        Tier::Exploited => 20.0 / 240.0,
        Tier::Unoccupied => 0.0,
    }
}

/// Expected passive undermining for a system at `progress` within `tier`.
pub fn decay_value(progress: f64, tier: Option<Tier>) -> i64 {
    let Some(tier) = tier.filter(|tier| tier.is_occupied()) else {
        return 0;
    };
    if progress <= 0.25 || progress > 1.0 {
        return 0;
    }
    let range = tier_range(tier);
    (((progress - 0.25) / 0.75) * (range * 0.75) * decay_modifier(tier)).floor() as i64
}

/// Decay expected for a cycle that started at `start`.
pub fn cycle_decay(start: &CycleStart) -> i64 {
    decay_value(start.start_progress, Some(start.start_tier))
}
