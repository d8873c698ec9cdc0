use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered machine, keyed by its serial number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    pub serial: String,
    pub ip_address: String,
    pub machine_number: String,
    pub signal_status: i64,
    pub total_signals: i64,
    pub cycle_time: f64,
    pub production_count: i64,
    pub operating_time: f64,
    pub downtime: f64,
    pub timestamp: String,
    pub imported_at: DateTime<Utc>,
}
