//! Weekly Powerplay cycle boundaries.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};

pub const TICK_WEEKDAY: Weekday = Weekday::Thu;
/// The game ticks at 07:00 UTC; five extra minutes let late results settle.
pub const TICK_HOUR: u32 = 7;
pub const TICK_MINUTE: u32 = 5;

/// Start of the first cycle of the current Powerplay era (cycle 1).
pub const CYCLE_EPOCH_SECS: i64 = 1_730_358_000; // 2024-10-31T07:00:00Z

/// Source of "now" for the long-running tasks; tests substitute a fixed instant.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

pub fn cycle_length() -> Duration {
    Duration::days(7)
}

/// Most recent tick at or before `now`.
pub fn last_tick(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_since = (now.weekday().num_days_from_monday() + 7
        - TICK_WEEKDAY.num_days_from_monday())
        % 7;
    let tick_date = now.date_naive() - Duration::days(i64::from(days_since));
    let tick_time = NaiveTime::from_hms_opt(TICK_HOUR, TICK_MINUTE, 0).unwrap_or_default();
    let tick = Utc.from_utc_datetime(&tick_date.and_time(tick_time));
    if tick > now {
        tick - cycle_length()
    } else {
        tick
    }
}

pub fn next_tick(now: DateTime<Utc>) -> DateTime<Utc> {
    last_tick(now) + cycle_length()
}

pub fn cycle_epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(CYCLE_EPOCH_SECS, 0)
        .single()
        .unwrap_or_default()
}

/// One-based cycle counter relative to [`cycle_epoch`].
pub fn cycle_number(now: DateTime<Utc>) -> i64 {
    let elapsed = now - cycle_epoch();
    elapsed
        .num_milliseconds()
        .div_euclid(cycle_length().num_milliseconds())
        + 1
}
