use chrono::{NaiveTime, Timelike};
use serde::Serialize;

use crate::{models::SignalStatus, settings::WorkingHours};

use super::projection::{minutes_of_day, normalized_position, Timeline};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HourLabel {
    pub hour: u32,
    /// Percent across the window.
    pub position: f64,
    pub label: String,
}

/// `"h:MM AM"` / `"h:MM PM"`.
pub fn format_time_label(time: NaiveTime) -> String {
    let period = if time.hour() >= 12 { "PM" } else { "AM" };
    let hour = match time.hour() % 12 {
        0 => 12,
        h => h,
    };
    format!("{hour}:{:02} {period}", time.minute())
}

/// A label for every whole hour inside the window.
pub fn hourly_labels(window: WorkingHours) -> Vec<HourLabel> {
    (window.start.hour()..=window.end.hour())
        .filter_map(|hour| NaiveTime::from_hms_opt(hour, 0, 0).map(|time| (hour, time)))
        .filter(|(_, time)| window.start <= *time && *time <= window.end)
        .map(|(hour, time)| HourLabel {
            hour,
            position: normalized_position(time, window.start, window.end) * 100.0,
            label: format_time_label(time),
        })
        .collect()
}

/// Uptime/downtime totals over a projected day, in fractional minutes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineSummary {
    pub running_minutes: f64,
    pub down_minutes: f64,
}

impl TimelineSummary {
    pub fn from_timeline(timeline: &Timeline<'_>, window: WorkingHours) -> Self {
        let window_minutes = minutes_of_day(window.end) - minutes_of_day(window.start);

        timeline
            .segments()
            .fold(Self::default(), |mut summary, segment| {
                let minutes = segment.width * window_minutes;
                match segment.status {
                    SignalStatus::Running => summary.running_minutes += minutes,
                    SignalStatus::Down => summary.down_minutes += minutes,
                }
                summary
            })
    }

    /// Running share of the observed time, `0` when nothing was observed.
    pub fn uptime_ratio(&self) -> f64 {
        let total = self.running_minutes + self.down_minutes;
        if total <= 0.0 {
            0.0
        } else {
            self.running_minutes / total
        }
    }
}
