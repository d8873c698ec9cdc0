use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime};
use rusqlite::{params, OptionalExtension, Row, Transaction};

use crate::db::{
    helpers::{format_date, format_time, parse_date, parse_optional_time, parse_status, parse_time},
    Database,
};
use crate::models::SignalLog;
use crate::signals::duration::describe_span;

const SELECT_COLUMNS: &str =
    "SELECT id, machine_id, status, timestamp, end_timestamp, duration, reason, date FROM signal_logs";

fn to_conversion_error(err: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            err.to_string(),
        )),
    )
}

fn row_to_signal_log(row: &Row) -> Result<SignalLog, rusqlite::Error> {
    let timestamp: String = row.get("timestamp")?;
    let end_timestamp: Option<String> = row.get("end_timestamp")?;
    let date: String = row.get("date")?;

    Ok(SignalLog {
        id: row.get("id")?,
        machine_id: row.get("machine_id")?,
        status: parse_status(row.get("status")?).map_err(to_conversion_error)?,
        timestamp: parse_time(&timestamp, "timestamp").map_err(to_conversion_error)?,
        end_timestamp: parse_optional_time(end_timestamp, "end_timestamp")
            .map_err(to_conversion_error)?,
        duration: row.get("duration")?,
        reason: row.get("reason")?,
        date: parse_date(&date, "date").map_err(to_conversion_error)?,
    })
}

/// Result of a guarded insert.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// Row written. Carries the predecessor that was closed by it, if any.
    Inserted { closed: Option<SignalLog> },
    /// A row already exists at the same machine, date and timestamp.
    Duplicate,
}

/// A derived-field rewrite for one row.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanUpdate {
    pub log_id: String,
    pub end_timestamp: Option<NaiveTime>,
    pub duration: Option<String>,
}

fn find_predecessor(tx: &Transaction<'_>, log: &SignalLog) -> Result<Option<SignalLog>> {
    let sql = format!(
        "{SELECT_COLUMNS}
         WHERE machine_id = ?1 AND date = ?2 AND timestamp < ?3
         ORDER BY timestamp DESC
         LIMIT 1"
    );
    tx.query_row(
        &sql,
        params![log.machine_id, format_date(log.date), format_time(log.timestamp)],
        row_to_signal_log,
    )
    .optional()
    .context("failed to look up preceding signal log")
}

impl Database {
    /// Insert a log unless one already exists at the same instant, closing the
    /// preceding log when the status changes. Runs in one transaction.
    pub async fn insert_signal_log(&self, log: &SignalLog) -> Result<InsertOutcome> {
        let record = log.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            let exists: bool = tx
                .query_row(
                    "SELECT EXISTS(
                        SELECT 1 FROM signal_logs
                        WHERE machine_id = ?1 AND date = ?2 AND timestamp = ?3
                     )",
                    params![
                        record.machine_id,
                        format_date(record.date),
                        format_time(record.timestamp)
                    ],
                    |row| row.get(0),
                )
                .context("failed to check for duplicate signal log")?;
            if exists {
                return Ok(InsertOutcome::Duplicate);
            }

            let predecessor = find_predecessor(&tx, &record)?;

            tx.execute(
                "INSERT INTO signal_logs (id, machine_id, status, timestamp, end_timestamp, duration, reason, date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id,
                    record.machine_id,
                    record.status.as_code(),
                    format_time(record.timestamp),
                    record.end_timestamp.map(format_time),
                    record.duration,
                    record.reason,
                    format_date(record.date),
                ],
            )
            .context("failed to insert signal log")?;

            let closed = match predecessor {
                Some(mut previous) if previous.status != record.status => {
                    let duration = describe_span(previous.timestamp, record.timestamp);
                    tx.execute(
                        "UPDATE signal_logs SET end_timestamp = ?1, duration = ?2 WHERE id = ?3",
                        params![format_time(record.timestamp), duration, previous.id],
                    )
                    .context("failed to close preceding signal log")?;
                    previous.end_timestamp = Some(record.timestamp);
                    previous.duration = Some(duration);
                    Some(previous)
                }
                // Back-dated same-status log: the predecessor's old close now
                // belongs to the inserted row.
                Some(previous)
                    if previous
                        .end_timestamp
                        .is_some_and(|end| end > record.timestamp) =>
                {
                    tx.execute(
                        "UPDATE signal_logs SET end_timestamp = NULL, duration = NULL WHERE id = ?1",
                        params![previous.id],
                    )
                    .context("failed to reopen preceding signal log")?;
                    None
                }
                _ => None,
            };

            tx.commit()?;
            Ok(InsertOutcome::Inserted { closed })
        })
        .await
    }

    /// Every log for a machine across all dates, oldest first.
    pub async fn list_signal_logs(&self, machine_id: &str) -> Result<Vec<SignalLog>> {
        let machine_id = machine_id.to_string();
        self.execute(move |conn| {
            let sql = format!(
                "{SELECT_COLUMNS}
                 WHERE machine_id = ?1
                 ORDER BY date ASC, timestamp ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let logs = stmt
                .query_map(params![machine_id], row_to_signal_log)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(logs)
        })
        .await
    }

    /// Logs for a machine on one date, oldest first.
    pub async fn list_signal_logs_for_date(
        &self,
        machine_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<SignalLog>> {
        let machine_id = machine_id.to_string();
        self.execute(move |conn| {
            let sql = format!(
                "{SELECT_COLUMNS}
                 WHERE machine_id = ?1 AND date = ?2
                 ORDER BY timestamp ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let logs = stmt
                .query_map(params![machine_id, format_date(date)], row_to_signal_log)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(logs)
        })
        .await
    }

    pub async fn get_signal_log(&self, log_id: &str) -> Result<Option<SignalLog>> {
        let log_id = log_id.to_string();
        self.execute(move |conn| {
            let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
            let log = conn
                .query_row(&sql, params![log_id], row_to_signal_log)
                .optional()?;
            Ok(log)
        })
        .await
    }

    pub async fn update_signal_log_reason(&self, log_id: &str, reason: &str) -> Result<()> {
        let log_id = log_id.to_string();
        let reason = reason.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE signal_logs SET reason = ?1 WHERE id = ?2",
                params![reason, log_id],
            )
            .with_context(|| "failed to update signal log reason")?;
            Ok(())
        })
        .await
    }

    /// Batch rewrite of `end_timestamp`/`duration`.
    pub async fn apply_span_updates(&self, updates: Vec<SpanUpdate>) -> Result<usize> {
        if updates.is_empty() {
            return Ok(0);
        }

        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut changed = 0;
            for update in &updates {
                changed += tx.execute(
                    "UPDATE signal_logs SET end_timestamp = ?1, duration = ?2 WHERE id = ?3",
                    params![
                        update.end_timestamp.map(format_time),
                        update.duration,
                        update.log_id
                    ],
                )?;
            }
            tx.commit()?;
            Ok(changed)
        })
        .await
    }

    /// Delete a machine's logs from every date other than `keep`.
    pub async fn delete_signal_logs_except_date(
        &self,
        machine_id: &str,
        keep: NaiveDate,
    ) -> Result<usize> {
        let machine_id = machine_id.to_string();
        self.execute(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM signal_logs WHERE machine_id = ?1 AND date <> ?2",
                    params![machine_id, format_date(keep)],
                )
                .with_context(|| "failed to purge stale signal logs")?;
            Ok(removed)
        })
        .await
    }
}
