mod labels;
mod projection;

pub use labels::{format_time_label, hourly_labels, HourLabel, TimelineSummary};
pub use projection::{minutes_of_day, normalized_position, Segments, Timeline, TimelineSegment};
