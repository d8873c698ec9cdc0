use chrono::{NaiveTime, Timelike};
use serde::Serialize;

use crate::{
    models::{SignalLog, SignalStatus},
    settings::WorkingHours,
};

/// Fractional minutes since midnight.
pub fn minutes_of_day(time: NaiveTime) -> f64 {
    f64::from(time.hour()) * 60.0 + f64::from(time.minute()) + f64::from(time.second()) / 60.0
}

/// Linear position of `time` across `[window_start, window_end]`, clamped to
/// `[0, 1]`.
pub fn normalized_position(time: NaiveTime, window_start: NaiveTime, window_end: NaiveTime) -> f64 {
    let start = minutes_of_day(window_start);
    let total = minutes_of_day(window_end) - start;
    if total <= 0.0 {
        return 0.0;
    }
    ((minutes_of_day(time) - start) / total).clamp(0.0, 1.0)
}

/// One render-ready bar.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineSegment<'a> {
    pub log: &'a SignalLog,
    pub status: SignalStatus,
    pub position: f64,
    pub width: f64,
    /// Still growing: the open interval measured up to now.
    pub active: bool,
}

/// A day's logs laid out across the working-hours window. Holds no state
/// beyond its inputs; `segments()` can be called any number of times.
#[derive(Debug, Clone)]
pub struct Timeline<'a> {
    logs: Vec<&'a SignalLog>,
    window: WorkingHours,
    now: NaiveTime,
}

impl<'a> Timeline<'a> {
    /// `logs` may arrive in any order.
    pub fn new(logs: &'a [SignalLog], window: WorkingHours, now: NaiveTime) -> Self {
        let mut logs: Vec<&SignalLog> = logs.iter().collect();
        logs.sort_by_key(|log| log.timestamp);
        Self { logs, window, now }
    }

    pub fn position(&self, time: NaiveTime) -> f64 {
        normalized_position(time, self.window.start, self.window.end)
    }

    pub fn segments(&self) -> Segments<'_, 'a> {
        Segments {
            timeline: self,
            index: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    fn segment_at(&self, index: usize) -> Option<TimelineSegment<'a>> {
        let log = *self.logs.get(index)?;
        let position = self.position(log.timestamp);

        let (end, active) = match (log.end_timestamp, self.logs.get(index + 1)) {
            (Some(end), _) => (self.position(end), false),
            (None, Some(next)) => (self.position(next.timestamp), false),
            (None, None) => (self.position(self.now), true),
        };

        Some(TimelineSegment {
            log,
            status: log.status,
            position,
            width: (end - position).max(0.0),
            active,
        })
    }
}

pub struct Segments<'t, 'a> {
    timeline: &'t Timeline<'a>,
    index: usize,
}

impl<'t, 'a> Iterator for Segments<'t, 'a> {
    type Item = TimelineSegment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let segment = self.timeline.segment_at(self.index)?;
        self.index += 1;
        Some(segment)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.timeline.logs.len().saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Segments<'_, '_> {}

impl<'t, 'a> IntoIterator for &'t Timeline<'a> {
    type Item = TimelineSegment<'a>;
    type IntoIter = Segments<'t, 'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments()
    }
}
