//! Duration-dependent transition odds for the live tick.

use std::ops::RangeInclusive;

/// Backfill run length, minutes.
pub const RUN_LENGTH_MINUTES: RangeInclusive<u32> = 30..=45;
/// Backfill downtime length, minutes.
pub const DOWN_LENGTH_MINUTES: RangeInclusive<u32> = 1..=5;

const FAILURE_GRACE_MINUTES: i64 = 30;
const FAILURE_BASE_PERCENT: i64 = 5;
const FAILURE_STEP_PERCENT: i64 = 3;
const FAILURE_CAP_PERCENT: i64 = 95;

/// Chance that a machine running for `minutes` goes down on this tick.
/// Zero before the 30-minute mark, then 5% rising 3 points a minute, capped
/// at 95%.
pub fn failure_probability(minutes: i64) -> f64 {
    if minutes < FAILURE_GRACE_MINUTES {
        return 0.0;
    }
    let percent = FAILURE_BASE_PERCENT
        .saturating_add(FAILURE_STEP_PERCENT.saturating_mul(minutes - FAILURE_GRACE_MINUTES))
        .min(FAILURE_CAP_PERCENT);
    percent as f64 / 100.0
}

/// Chance that a machine down for `minutes` recovers on this tick.
pub fn recovery_probability(minutes: i64) -> f64 {
    match minutes {
        m if m < 1 => 0.0,
        1..=3 => 0.30,
        4..=5 => 0.60,
        _ => 0.90,
    }
}
