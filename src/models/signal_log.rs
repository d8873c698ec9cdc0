use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Binary machine state. Stored and exchanged as `0` (down) / `1` (running).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SignalStatus {
    Down,
    Running,
}

impl SignalStatus {
    pub fn as_code(&self) -> i64 {
        match self {
            SignalStatus::Down => 0,
            SignalStatus::Running => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Down => "Down",
            SignalStatus::Running => "Running",
        }
    }

    pub fn flipped(&self) -> Self {
        match self {
            SignalStatus::Down => SignalStatus::Running,
            SignalStatus::Running => SignalStatus::Down,
        }
    }
}

/// Fixed catalogue of downtime causes used by the simulator.
pub const DOWNTIME_REASONS: [&str; 8] = [
    "maintenance",
    "breakdown",
    "setup",
    "material",
    "operator",
    "quality",
    "planned",
    "other",
];

/// One status-change event for a machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignalLog {
    pub id: String,
    pub machine_id: String,
    pub status: SignalStatus,
    /// Time of day the state started.
    pub timestamp: NaiveTime,
    /// Set once a successor with a different status exists.
    pub end_timestamp: Option<NaiveTime>,
    pub duration: Option<String>,
    pub reason: String,
    pub date: NaiveDate,
}

impl SignalLog {
    pub fn is_open(&self) -> bool {
        self.end_timestamp.is_none()
    }
}
