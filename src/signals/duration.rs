use chrono::{NaiveTime, Timelike};

const MINUTES_PER_DAY: i64 = 24 * 60;

fn minute_of_day(time: NaiveTime) -> i64 {
    i64::from(time.hour()) * 60 + i64::from(time.minute())
}

/// Whole minutes from `start` to `end`, ignoring seconds. A negative span is
/// read as crossing midnight.
pub fn elapsed_minutes(start: NaiveTime, end: NaiveTime) -> i64 {
    let diff = minute_of_day(end) - minute_of_day(start);
    if diff < 0 {
        diff + MINUTES_PER_DAY
    } else {
        diff
    }
}

/// `"Nm"` below an hour, `"Hh Mm"` otherwise.
pub fn format_minutes(minutes: i64) -> String {
    let hours = minutes / 60;
    let remaining = minutes % 60;
    if hours > 0 {
        format!("{hours}h {remaining}m")
    } else {
        format!("{remaining}m")
    }
}

pub fn describe_span(start: NaiveTime, end: NaiveTime) -> String {
    format_minutes(elapsed_minutes(start, end))
}
