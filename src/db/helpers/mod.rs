use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::models::SignalStatus;

pub const TIME_FORMAT: &str = "%H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn format_time(value: NaiveTime) -> String {
    value.format(TIME_FORMAT).to_string()
}

pub fn format_date(value: NaiveDate) -> String {
    value.format(DATE_FORMAT).to_string()
}

pub fn parse_time(value: &str, field: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, TIME_FORMAT)
        .with_context(|| format!("failed to parse {field} '{value}'"))
}

pub fn parse_optional_time(value: Option<String>, field: &str) -> Result<Option<NaiveTime>> {
    match value {
        Some(raw) => parse_time(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_date(value: &str, field: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .with_context(|| format!("failed to parse {field} '{value}'"))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_status(value: i64) -> Result<SignalStatus> {
    match value {
        0 => Ok(SignalStatus::Down),
        1 => Ok(SignalStatus::Running),
        other => Err(anyhow!("unknown signal status {other}")),
    }
}
