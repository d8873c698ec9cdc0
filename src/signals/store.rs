use std::sync::Arc;

use chrono::{NaiveTime, Timelike};
use log::{debug, info};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    clock::Clock,
    db::{Database, InsertOutcome, SpanUpdate},
    models::{SignalLog, SignalStatus},
    settings::{SettingsStore, WorkingHours},
};

use super::{
    duration::describe_span,
    error::StoreError,
    subscription::{spawn_subscription, LogSubscription},
};

const CHANGE_FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogOrder {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResetOutcome {
    pub purged: usize,
    pub seeded: Option<SignalLog>,
}

/// Per-machine signal logs with admission rules, derived-field upkeep and a
/// change feed for live subscribers.
#[derive(Clone)]
pub struct SignalStore {
    db: Database,
    clock: Arc<dyn Clock>,
    settings: Arc<SettingsStore>,
    changes: broadcast::Sender<String>,
}

impl SignalStore {
    pub fn new(db: Database, clock: Arc<dyn Clock>, settings: Arc<SettingsStore>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            db,
            clock,
            settings,
            changes,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn working_hours(&self) -> WorkingHours {
        self.settings.working_hours()
    }

    /// Append a status change for today. The reason is dropped for
    /// `Running` logs.
    pub async fn append_log(
        &self,
        machine_id: &str,
        status: SignalStatus,
        timestamp: NaiveTime,
        reason: Option<&str>,
    ) -> Result<SignalLog, StoreError> {
        let timestamp = timestamp.with_nanosecond(0).unwrap_or(timestamp);
        let hours = self.working_hours();
        if !hours.contains(timestamp) {
            return Err(StoreError::OutOfHours {
                timestamp,
                start: hours.start,
                end: hours.end,
            });
        }

        let reason = match status {
            SignalStatus::Down => reason.unwrap_or_default().trim().to_string(),
            SignalStatus::Running => String::new(),
        };

        let log = SignalLog {
            id: Uuid::new_v4().to_string(),
            machine_id: machine_id.to_string(),
            status,
            timestamp,
            end_timestamp: None,
            duration: None,
            reason,
            date: self.clock.today(),
        };

        match self.db.insert_signal_log(&log).await? {
            InsertOutcome::Duplicate => Err(StoreError::Duplicate {
                machine_id: log.machine_id,
                timestamp,
            }),
            InsertOutcome::Inserted { closed } => {
                if let Some(previous) = closed {
                    debug!(
                        "Closed log {} for machine {} after {}",
                        previous.id,
                        machine_id,
                        previous.duration.as_deref().unwrap_or_default()
                    );
                }
                debug!(
                    "Appended {} log {} for machine {} at {}",
                    log.status.as_str(),
                    log.id,
                    machine_id,
                    timestamp
                );
                self.notify(machine_id);
                Ok(log)
            }
        }
    }

    /// Append a log stamped with the current time of day.
    pub async fn append_now(
        &self,
        machine_id: &str,
        status: SignalStatus,
        reason: Option<&str>,
    ) -> Result<SignalLog, StoreError> {
        let now = self.clock.time_of_day();
        self.append_log(machine_id, status, now, reason).await
    }

    /// Every stored log for the machine, across all dates.
    pub async fn get_logs(
        &self,
        machine_id: &str,
        order: LogOrder,
    ) -> Result<Vec<SignalLog>, StoreError> {
        let mut logs = self.db.list_signal_logs(machine_id).await?;
        if order == LogOrder::Descending {
            logs.reverse();
        }
        Ok(logs)
    }

    /// Today's logs, newest first.
    pub async fn today_logs(&self, machine_id: &str) -> Result<Vec<SignalLog>, StoreError> {
        let mut logs = self
            .db
            .list_signal_logs_for_date(machine_id, self.clock.today())
            .await?;
        logs.reverse();
        Ok(logs)
    }

    /// Today's most recent log, if any.
    pub async fn latest_log(&self, machine_id: &str) -> Result<Option<SignalLog>, StoreError> {
        let logs = self
            .db
            .list_signal_logs_for_date(machine_id, self.clock.today())
            .await?;
        Ok(logs.into_iter().last())
    }

    /// Push today's snapshot to `on_change` now and after every mutation of
    /// this machine's logs. Snapshots may repeat.
    pub fn subscribe_logs<F>(&self, machine_id: &str, on_change: F) -> LogSubscription
    where
        F: Fn(Vec<SignalLog>) + Send + Sync + 'static,
    {
        let feed = self.changes.subscribe();
        spawn_subscription(self.clone(), machine_id.to_string(), feed, on_change)
    }

    /// Replace the reason of a downtime log.
    pub async fn update_reason(
        &self,
        log_id: &str,
        machine_id: &str,
        reason: &str,
    ) -> Result<SignalLog, StoreError> {
        let mut log = match self.db.get_signal_log(log_id).await? {
            Some(log) if log.machine_id == machine_id => log,
            _ => {
                return Err(StoreError::NotFound {
                    log_id: log_id.to_string(),
                    machine_id: machine_id.to_string(),
                })
            }
        };

        if log.status != SignalStatus::Down {
            return Err(StoreError::NotDown {
                log_id: log_id.to_string(),
            });
        }

        let reason = reason.trim().to_string();
        self.db.update_signal_log_reason(log_id, &reason).await?;
        log.reason = reason;
        self.notify(machine_id);
        Ok(log)
    }

    /// Re-derive `end_timestamp`/`duration` across today's logs. Closed logs
    /// end where a differing status begins; the trailing open log only gets a
    /// provisional duration up to now.
    pub async fn recompute_durations(&self, machine_id: &str) -> Result<usize, StoreError> {
        let logs = self
            .db
            .list_signal_logs_for_date(machine_id, self.clock.today())
            .await?;
        let hours = self.working_hours();
        let horizon = self.clock.time_of_day().min(hours.end);

        let updates = plan_span_updates(&logs, horizon);
        let changed = self.db.apply_span_updates(updates).await?;
        if changed > 0 {
            debug!("Refreshed {changed} durations for machine {machine_id}");
            self.notify(machine_id);
        }
        Ok(changed)
    }

    /// Drop every log not dated today.
    pub async fn purge_previous_days(&self, machine_id: &str) -> Result<usize, StoreError> {
        let purged = self
            .db
            .delete_signal_logs_except_date(machine_id, self.clock.today())
            .await?;
        if purged > 0 {
            info!("Purged {purged} logs from previous days for machine {machine_id}");
            self.notify(machine_id);
        }
        Ok(purged)
    }

    /// Purge previous days and seed a `Running` log at the start of working
    /// hours when today is still empty.
    pub async fn reset_day(&self, machine_id: &str) -> Result<ResetOutcome, StoreError> {
        let purged = self.purge_previous_days(machine_id).await?;

        let seeded = if self.latest_log(machine_id).await?.is_none() {
            let start = self.working_hours().start;
            Some(
                self.append_log(machine_id, SignalStatus::Running, start, None)
                    .await?,
            )
        } else {
            None
        };

        Ok(ResetOutcome { purged, seeded })
    }

    fn notify(&self, machine_id: &str) {
        // No receivers just means nobody is watching.
        let _ = self.changes.send(machine_id.to_string());
    }
}

/// Derived-field rewrites for one day's logs, given in ascending order.
pub(crate) fn plan_span_updates(logs: &[SignalLog], horizon: NaiveTime) -> Vec<SpanUpdate> {
    let mut updates = Vec::new();

    for pair in logs.windows(2) {
        let (current, next) = (&pair[0], &pair[1]);
        if current.status == next.status {
            // A same-status successor inside a closed span splits it; the
            // earlier log goes back to open.
            if current
                .end_timestamp
                .is_some_and(|end| end > next.timestamp)
            {
                updates.push(SpanUpdate {
                    log_id: current.id.clone(),
                    end_timestamp: None,
                    duration: None,
                });
            }
            continue;
        }
        let duration = describe_span(current.timestamp, next.timestamp);
        if current.end_timestamp != Some(next.timestamp)
            || current.duration.as_deref() != Some(duration.as_str())
        {
            updates.push(SpanUpdate {
                log_id: current.id.clone(),
                end_timestamp: Some(next.timestamp),
                duration: Some(duration),
            });
        }
    }

    if let Some(last) = logs.last() {
        if last.is_open() && horizon >= last.timestamp {
            let duration = describe_span(last.timestamp, horizon);
            if last.duration.as_deref() != Some(duration.as_str()) {
                updates.push(SpanUpdate {
                    log_id: last.id.clone(),
                    end_timestamp: None,
                    duration: Some(duration),
                });
            }
        }
    }

    updates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::settings::SimulationSettings;
    use chrono::{Duration, NaiveDate};

    fn t(hour: u32, minute: u32, second: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, second).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn store_at(hour: u32, minute: u32) -> (SignalStore, ManualClock) {
        let clock = ManualClock::at(day(), hour, minute, 0);
        let settings = Arc::new(SettingsStore::ephemeral(SimulationSettings::default()));
        let store = SignalStore::new(
            Database::open_in_memory().unwrap(),
            Arc::new(clock.clone()),
            settings,
        );
        (store, clock)
    }

    #[tokio::test]
    async fn appended_fields_round_trip() {
        let (store, _clock) = store_at(12, 0);

        let created = store
            .append_log("m-1", SignalStatus::Down, t(9, 12, 40), Some("setup"))
            .await
            .unwrap();
        let logs = store.get_logs("m-1", LogOrder::Ascending).await.unwrap();

        assert_eq!(logs, vec![created.clone()]);
        assert_eq!(created.machine_id, "m-1");
        assert_eq!(created.status, SignalStatus::Down);
        assert_eq!(created.timestamp, t(9, 12, 40));
        assert_eq!(created.reason, "setup");
        assert_eq!(created.date, day());
    }

    #[tokio::test]
    async fn running_logs_never_carry_a_reason() {
        let (store, _clock) = store_at(12, 0);
        let log = store
            .append_log("m-1", SignalStatus::Running, t(9, 0, 0), Some("breakdown"))
            .await
            .unwrap();
        assert!(log.reason.is_empty());
    }

    #[tokio::test]
    async fn duplicate_timestamp_keeps_a_single_log() {
        let (store, _clock) = store_at(12, 0);
        store
            .append_log("m-1", SignalStatus::Running, t(9, 0, 0), None)
            .await
            .unwrap();

        let second = store
            .append_log("m-1", SignalStatus::Running, t(9, 0, 0), None)
            .await;

        assert!(matches!(second, Err(StoreError::Duplicate { .. })));
        assert_eq!(store.get_logs("m-1", LogOrder::Ascending).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn same_timestamp_on_another_machine_is_fine() {
        let (store, _clock) = store_at(12, 0);
        store
            .append_log("m-1", SignalStatus::Running, t(9, 0, 0), None)
            .await
            .unwrap();
        store
            .append_log("m-2", SignalStatus::Running, t(9, 0, 0), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn out_of_hours_appends_are_rejected() {
        let (store, _clock) = store_at(12, 0);

        for time in [t(7, 59, 0), t(17, 1, 0)] {
            let result = store
                .append_log("m-1", SignalStatus::Running, time, None)
                .await;
            assert!(matches!(result, Err(StoreError::OutOfHours { .. })));
        }
        assert!(store
            .get_logs("m-1", LogOrder::Ascending)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn status_change_closes_the_previous_log() {
        let (store, _clock) = store_at(12, 0);
        store
            .append_log("m-1", SignalStatus::Running, t(8, 0, 0), None)
            .await
            .unwrap();
        store
            .append_log("m-1", SignalStatus::Down, t(8, 35, 0), Some("material"))
            .await
            .unwrap();

        let logs = store.get_logs("m-1", LogOrder::Ascending).await.unwrap();
        assert_eq!(logs[0].end_timestamp, Some(t(8, 35, 0)));
        assert_eq!(logs[0].duration.as_deref(), Some("35m"));
        assert!(logs[1].is_open());
    }

    #[tokio::test]
    async fn reason_edits_only_apply_to_downtime() {
        let (store, _clock) = store_at(12, 0);
        let running = store
            .append_log("m-1", SignalStatus::Running, t(8, 0, 0), None)
            .await
            .unwrap();
        let down = store
            .append_log("m-1", SignalStatus::Down, t(8, 40, 0), Some("other"))
            .await
            .unwrap();

        let rejected = store.update_reason(&running.id, "m-1", "quality").await;
        assert!(matches!(rejected, Err(StoreError::NotDown { .. })));

        store.update_reason(&down.id, "m-1", "quality").await.unwrap();
        let logs = store.get_logs("m-1", LogOrder::Ascending).await.unwrap();
        assert_eq!(logs[0].reason, "");
        assert_eq!(logs[1].reason, "quality");
    }

    #[tokio::test]
    async fn reason_edit_checks_machine_ownership() {
        let (store, _clock) = store_at(12, 0);
        let down = store
            .append_log("m-1", SignalStatus::Down, t(8, 40, 0), None)
            .await
            .unwrap();

        let result = store.update_reason(&down.id, "m-2", "quality").await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn recompute_grows_the_open_interval_without_closing_it() {
        let (store, clock) = store_at(9, 0);
        store
            .append_log("m-1", SignalStatus::Running, t(8, 0, 0), None)
            .await
            .unwrap();

        store.recompute_durations("m-1").await.unwrap();
        let open = store.latest_log("m-1").await.unwrap().unwrap();
        assert_eq!(open.duration.as_deref(), Some("1h 0m"));
        assert_eq!(open.end_timestamp, None);

        clock.advance(Duration::minutes(25));
        store.recompute_durations("m-1").await.unwrap();
        let open = store.latest_log("m-1").await.unwrap().unwrap();
        assert_eq!(open.duration.as_deref(), Some("1h 25m"));
        assert_eq!(open.end_timestamp, None);
    }

    #[tokio::test]
    async fn recompute_caps_the_open_interval_at_closing_time() {
        let (store, clock) = store_at(16, 0);
        store
            .append_log("m-1", SignalStatus::Running, t(16, 30, 0), None)
            .await
            .unwrap();
        clock.set(day().and_time(t(18, 45, 0)));

        store.recompute_durations("m-1").await.unwrap();

        let open = store.latest_log("m-1").await.unwrap().unwrap();
        assert_eq!(open.duration.as_deref(), Some("30m"));
        assert!(open.is_open());
    }

    #[test]
    fn span_plan_repairs_missing_end_times() {
        let log = |id: &str, status, time| SignalLog {
            id: id.into(),
            machine_id: "m-1".into(),
            status,
            timestamp: time,
            end_timestamp: None,
            duration: None,
            reason: String::new(),
            date: day(),
        };
        let logs = vec![
            log("a", SignalStatus::Running, t(8, 0, 0)),
            log("b", SignalStatus::Running, t(8, 20, 0)),
            log("c", SignalStatus::Down, t(8, 50, 0)),
        ];

        let updates = plan_span_updates(&logs, t(9, 0, 0));

        assert_eq!(
            updates,
            vec![
                SpanUpdate {
                    log_id: "b".into(),
                    end_timestamp: Some(t(8, 50, 0)),
                    duration: Some("30m".into()),
                },
                SpanUpdate {
                    log_id: "c".into(),
                    end_timestamp: None,
                    duration: Some("10m".into()),
                },
            ]
        );
    }

    #[test]
    fn span_plan_reopens_log_split_by_same_status_successor() {
        let log = |id: &str, status, time, end| SignalLog {
            id: id.into(),
            machine_id: "m-1".into(),
            status,
            timestamp: time,
            end_timestamp: end,
            duration: end.map(|end| describe_span(time, end)),
            reason: String::new(),
            date: day(),
        };
        let logs = vec![
            log("p", SignalStatus::Running, t(8, 0, 0), Some(t(9, 0, 0))),
            log("n", SignalStatus::Running, t(8, 30, 0), None),
            log("s", SignalStatus::Down, t(9, 0, 0), Some(t(9, 10, 0))),
        ];

        let updates = plan_span_updates(&logs, t(9, 10, 0));

        assert_eq!(
            updates,
            vec![
                SpanUpdate {
                    log_id: "p".into(),
                    end_timestamp: None,
                    duration: None,
                },
                SpanUpdate {
                    log_id: "n".into(),
                    end_timestamp: Some(t(9, 0, 0)),
                    duration: Some("30m".into()),
                },
            ]
        );
    }

    #[tokio::test]
    async fn back_dated_running_log_takes_over_the_closed_span() {
        let (store, _clock) = store_at(10, 0);
        let first = store
            .append_log("m-1", SignalStatus::Running, t(8, 0, 0), None)
            .await
            .unwrap();
        store
            .append_log("m-1", SignalStatus::Down, t(9, 0, 0), None)
            .await
            .unwrap();
        let inserted = store
            .append_log("m-1", SignalStatus::Running, t(8, 30, 0), None)
            .await
            .unwrap();

        store.recompute_durations("m-1").await.unwrap();

        let logs = store.get_logs("m-1", LogOrder::Ascending).await.unwrap();
        assert_eq!(logs[0].id, first.id);
        assert_eq!(logs[1].id, inserted.id);
        assert!(logs[0].is_open());
        assert_eq!(logs[0].duration, None);
        assert_eq!(logs[1].end_timestamp, Some(t(9, 0, 0)));
        assert_eq!(logs[1].duration.as_deref(), Some("30m"));
        assert_eq!(logs[2].duration.as_deref(), Some("1h 0m"));
    }

    #[tokio::test]
    async fn reset_day_purges_history_and_seeds_opening_log() {
        let (store, clock) = store_at(10, 0);
        store
            .append_log("m-1", SignalStatus::Down, t(9, 0, 0), None)
            .await
            .unwrap();

        clock.advance(Duration::days(1));
        let outcome = store.reset_day("m-1").await.unwrap();

        assert_eq!(outcome.purged, 1);
        let seeded = outcome.seeded.unwrap();
        assert_eq!(seeded.status, SignalStatus::Running);
        assert_eq!(seeded.timestamp, t(8, 0, 0));
        assert_eq!(seeded.date, day() + Duration::days(1));

        let again = store.reset_day("m-1").await.unwrap();
        assert_eq!(again, ResetOutcome { purged: 0, seeded: None });
    }
}
