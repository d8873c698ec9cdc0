use chrono::NaiveTime;
use thiserror::Error;

/// Why a store operation did not take effect.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("timestamp {timestamp} is outside working hours {start}-{end}")]
    OutOfHours {
        timestamp: NaiveTime,
        start: NaiveTime,
        end: NaiveTime,
    },

    #[error("machine {machine_id} already has a log at {timestamp}")]
    Duplicate {
        machine_id: String,
        timestamp: NaiveTime,
    },

    #[error("log {log_id} is not a downtime record")]
    NotDown { log_id: String },

    #[error("log {log_id} not found for machine {machine_id}")]
    NotFound { log_id: String, machine_id: String },

    #[error("signal store unavailable: {0:#}")]
    RemoteUnavailable(#[from] anyhow::Error),
}

impl StoreError {
    /// Rejections the caller can simply drop; everything else is an outage.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, StoreError::RemoteUnavailable(_))
    }
}
