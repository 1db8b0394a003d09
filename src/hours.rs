//! Worked-hours arithmetic.
//!
//! Hours are `(end - start)` in seconds divided by 3600, rounded to two
//! decimals only at the presentation boundary. Sums are taken over unrounded
//! seconds so that per-record and aggregate totals agree.

use chrono::{DateTime, Duration, Utc};

use crate::models::ClockinRecord;

/// Round to two decimals (half away from zero).
pub fn round2(hours: f64) -> f64 {
    (hours * 100.0).round() / 100.0
}

pub fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

/// Rounded hours between two instants.
pub fn hours_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    round2(seconds_between(start, end) / 3600.0)
}

/// Rounded hours for a single clock-in; open clock-ins count as zero.
pub fn clockin_hours(clockin: &ClockinRecord) -> f64 {
    match clockin.end_time {
        Some(end) => hours_between(clockin.start_time, end),
        None => 0.0,
    }
}

/// Rounded total over the completed clock-ins in `clockins`.
pub fn total_hours<'a, I>(clockins: I) -> f64
where
    I: IntoIterator<Item = &'a ClockinRecord>,
{
    let secs: f64 = clockins
        .into_iter()
        .filter_map(|c| c.end_time.map(|end| seconds_between(c.start_time, end)))
        .sum();
    round2(secs / 3600.0)
}

/// Upper bound on a single clock-in's length, in hours (one leap year).
pub const MAX_CLOCKIN_HOURS: f64 = 24.0 * 366.0;

/// Converts fractional hours into a duration with millisecond precision.
/// `None` for non-finite, negative, or longer-than-[`MAX_CLOCKIN_HOURS`] input.
pub fn duration_from_hours(hours: f64) -> Option<Duration> {
    if !hours.is_finite() || !(0.0..=MAX_CLOCKIN_HOURS).contains(&hours) {
        return None;
    }
    Duration::try_milliseconds((hours * 3_600_000.0).round() as i64)
}
