use chrono::{Duration, NaiveDateTime};

use crate::{
    log_info, log_warn,
    models::{SignalLog, SignalStatus},
    signals::SignalStore,
};

use super::{
    probability::{DOWN_LENGTH_MINUTES, RUN_LENGTH_MINUTES},
    random::{random_reason, Draw},
};

const ENABLE_LOGS: bool = true;

/// What a backfill pass left behind.
#[derive(Debug, Clone, PartialEq)]
pub struct BackfillReport {
    pub appended: Vec<SignalLog>,
    /// Status of the last interval written (or assumed).
    pub status: SignalStatus,
    /// Start of that interval.
    pub interval_start: NaiveDateTime,
}

/// Generate a plausible history from the start of working hours up to `now`.
/// Logs are appended one at a time so timestamps stay monotonic; nothing at or
/// past `now` is written.
pub async fn backfill(
    store: &SignalStore,
    machine_id: &str,
    now: NaiveDateTime,
    draw: &mut dyn Draw,
) -> BackfillReport {
    let hours = store.working_hours();
    let horizon = now.date().and_time(now.time().min(hours.end));

    let mut cursor = now.date().and_time(hours.start);
    let mut report = BackfillReport {
        appended: Vec::new(),
        status: SignalStatus::Running,
        interval_start: cursor,
    };

    if cursor >= horizon {
        return report;
    }

    if !write(store, machine_id, SignalStatus::Running, cursor, None, &mut report).await {
        return report;
    }

    loop {
        let span = match report.status {
            SignalStatus::Running => {
                draw.minutes(*RUN_LENGTH_MINUTES.start(), *RUN_LENGTH_MINUTES.end())
            }
            SignalStatus::Down => {
                draw.minutes(*DOWN_LENGTH_MINUTES.start(), *DOWN_LENGTH_MINUTES.end())
            }
        };
        let next = cursor + Duration::minutes(i64::from(span));
        if next >= horizon {
            break;
        }

        let status = report.status.flipped();
        let reason = match status {
            SignalStatus::Down => Some(random_reason(draw)),
            SignalStatus::Running => None,
        };
        if !write(store, machine_id, status, next, reason, &mut report).await {
            break;
        }
        cursor = next;
    }

    log_info!(
        "Backfilled {} logs for machine {} up to {}",
        report.appended.len(),
        machine_id,
        horizon.time()
    );
    report
}

/// Returns `false` when the store is unreachable and the pass should stop.
async fn write(
    store: &SignalStore,
    machine_id: &str,
    status: SignalStatus,
    at: NaiveDateTime,
    reason: Option<&str>,
    report: &mut BackfillReport,
) -> bool {
    match store.append_log(machine_id, status, at.time(), reason).await {
        Ok(log) => report.appended.push(log),
        Err(err) if !err.is_rejection() => {
            log_warn!("Backfill for machine {machine_id} stopped: {err}");
            return false;
        }
        Err(err) => log_warn!("Backfill skipped {} at {}: {err}", status.as_str(), at.time()),
    }
    report.status = status;
    report.interval_start = at;
    true
}
