use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

use crate::{
    log_error, log_info, log_warn,
    models::{SignalLog, SignalStatus},
    signals::{SignalStore, StoreError},
};

use super::{
    backfill::{backfill, BackfillReport},
    probability::{failure_probability, recovery_probability},
    random::{random_reason, Draw},
};

const ENABLE_LOGS: bool = true;

/// Minimum spacing between two appended logs for one machine.
pub const RATE_LIMIT_SECS: i64 = 60;

/// Simulator bookkeeping for one machine. Exactly one of `running_since` /
/// `down_since` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationState {
    pub last_status: SignalStatus,
    pub running_since: Option<NaiveDateTime>,
    pub down_since: Option<NaiveDateTime>,
    pub last_log_at: Option<NaiveDateTime>,
}

impl SimulationState {
    pub fn starting(status: SignalStatus, since: NaiveDateTime) -> Self {
        let mut state = Self {
            last_status: status,
            running_since: None,
            down_since: None,
            last_log_at: None,
        };
        state.enter(status, since);
        state
    }

    fn enter(&mut self, status: SignalStatus, at: NaiveDateTime) {
        self.last_status = status;
        match status {
            SignalStatus::Running => {
                self.running_since = Some(at);
                self.down_since = None;
            }
            SignalStatus::Down => {
                self.down_since = Some(at);
                self.running_since = None;
            }
        }
    }

    /// Whole minutes spent in the current status.
    pub fn minutes_in_status(&self, now: NaiveDateTime) -> i64 {
        let since = match self.last_status {
            SignalStatus::Running => self.running_since,
            SignalStatus::Down => self.down_since,
        };
        since
            .map(|start| (now - start).num_minutes().max(0))
            .unwrap_or(0)
    }

    fn rate_limited(&self, now: NaiveDateTime) -> bool {
        self.last_log_at
            .map(|last| now - last < Duration::seconds(RATE_LIMIT_SECS))
            .unwrap_or(false)
    }
}

/// How a machine was brought up when first selected.
#[derive(Debug, Clone, PartialEq)]
pub enum Initialization {
    Backfilled(BackfillReport),
    /// Today already had logs; state was taken from the latest one.
    Resumed(SignalLog),
    /// Nothing to resume and backfill not allowed right now.
    Idle,
}

#[derive(Debug)]
pub enum TickOutcome {
    Disabled,
    OutsideHours,
    RateLimited,
    /// No transition this cycle.
    Held { probability: f64 },
    Transitioned(SignalLog),
    /// The append was refused or failed; retried next cycle.
    Failed(StoreError),
}

/// Owned simulation context for one selected machine.
pub struct MachineSimulation {
    machine_id: String,
    store: SignalStore,
    draw: Box<dyn Draw>,
    state: SimulationState,
}

impl MachineSimulation {
    pub fn new(machine_id: impl Into<String>, store: SignalStore, draw: Box<dyn Draw>) -> Self {
        let now = store.clock().now();
        let opening = now.date().and_time(store.working_hours().start);
        Self {
            machine_id: machine_id.into(),
            store,
            draw,
            state: SimulationState::starting(SignalStatus::Running, opening),
        }
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    /// Drop previous days, then either resume from today's latest log or
    /// backfill today's history when simulation is enabled and the shop is
    /// open.
    pub async fn initialize(&mut self) -> Initialization {
        if let Err(err) = self.store.purge_previous_days(&self.machine_id).await {
            log_warn!("Could not purge old logs for {}: {err}", self.machine_id);
        }

        match self.store.latest_log(&self.machine_id).await {
            Ok(Some(latest)) => {
                let since = latest.date.and_time(latest.timestamp);
                self.state = SimulationState::starting(latest.status, since);
                log_info!(
                    "Resumed machine {} as {} since {}",
                    self.machine_id,
                    latest.status.as_str(),
                    latest.timestamp
                );
                return Initialization::Resumed(latest);
            }
            Ok(None) => {}
            Err(err) => {
                log_error!("Could not load logs for {}: {err}", self.machine_id);
                return Initialization::Idle;
            }
        }

        let now = self.store.clock().now();
        if !self.store.settings().is_enabled() || !self.store.working_hours().contains(now.time()) {
            return Initialization::Idle;
        }

        let report = backfill(&self.store, &self.machine_id, now, self.draw.as_mut()).await;
        self.state = SimulationState::starting(report.status, report.interval_start);
        if !report.appended.is_empty() {
            self.state.last_log_at = Some(now);
        }
        Initialization::Backfilled(report)
    }

    /// One live-tick cycle.
    pub async fn tick(&mut self) -> TickOutcome {
        if !self.store.settings().is_enabled() {
            return TickOutcome::Disabled;
        }

        let now = self.store.clock().now();
        if !self.store.working_hours().contains(now.time()) {
            return TickOutcome::OutsideHours;
        }
        if self.state.rate_limited(now) {
            return TickOutcome::RateLimited;
        }

        let minutes = self.state.minutes_in_status(now);
        let probability = match self.state.last_status {
            SignalStatus::Running => failure_probability(minutes),
            SignalStatus::Down => recovery_probability(minutes),
        };
        if probability <= 0.0 || self.draw.uniform() >= probability {
            return TickOutcome::Held { probability };
        }

        let next = self.state.last_status.flipped();
        let reason = match next {
            SignalStatus::Down => Some(random_reason(self.draw.as_mut())),
            SignalStatus::Running => None,
        };

        match self.transition(next, reason, now).await {
            Ok(log) => TickOutcome::Transitioned(log),
            Err(err) => {
                log_warn!("Tick for machine {} did not transition: {err}", self.machine_id);
                TickOutcome::Failed(err)
            }
        }
    }

    /// Direct user action: record a status at the current time.
    pub async fn record(
        &mut self,
        status: SignalStatus,
        reason: Option<&str>,
    ) -> Result<SignalLog, StoreError> {
        let now = self.store.clock().now();
        self.transition(status, reason, now).await
    }

    async fn transition(
        &mut self,
        status: SignalStatus,
        reason: Option<&str>,
        now: NaiveDateTime,
    ) -> Result<SignalLog, StoreError> {
        let log = self
            .store
            .append_log(&self.machine_id, status, now.time(), reason)
            .await?;

        if status != self.state.last_status {
            self.state.enter(status, now);
        }
        self.state.last_log_at = Some(now);
        log_info!(
            "Machine {} is now {} ({})",
            self.machine_id,
            status.as_str(),
            if log.reason.is_empty() { "-" } else { log.reason.as_str() }
        );

        if let Err(err) = self.store.recompute_durations(&self.machine_id).await {
            log_warn!("Duration refresh after transition failed: {err}");
        }
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveDate, NaiveTime};

    use super::*;
    use crate::{
        clock::ManualClock,
        db::Database,
        settings::{SettingsStore, SimulationSettings},
        signals::LogOrder,
        simulation::random::FixedDraw,
    };

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn at(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
        day().and_time(NaiveTime::from_hms_opt(hour, minute, second).unwrap())
    }

    fn setup(enabled: bool, clock: &ManualClock) -> SignalStore {
        let settings = SettingsStore::ephemeral(SimulationSettings {
            is_enabled: enabled,
            ..SimulationSettings::default()
        });
        SignalStore::new(
            Database::open_in_memory().unwrap(),
            Arc::new(clock.clone()),
            Arc::new(settings),
        )
    }

    #[tokio::test]
    async fn initialize_backfills_an_empty_day() {
        let clock = ManualClock::new(at(9, 0, 0));
        let store = setup(true, &clock);
        let mut sim = MachineSimulation::new("m-1", store.clone(), Box::new(FixedDraw::shortest()));

        let init = sim.initialize().await;

        assert!(matches!(init, Initialization::Backfilled(ref r) if r.appended.len() == 3));
        assert_eq!(sim.state().last_status, SignalStatus::Running);
        assert_eq!(sim.state().running_since, Some(at(8, 31, 0)));
        assert_eq!(sim.state().down_since, None);
    }

    #[tokio::test]
    async fn initialize_resumes_from_todays_latest_log() {
        let clock = ManualClock::new(at(11, 0, 0));
        let store = setup(true, &clock);
        store
            .append_log("m-1", SignalStatus::Down, NaiveTime::from_hms_opt(10, 58, 0).unwrap(), None)
            .await
            .unwrap();
        let mut sim = MachineSimulation::new("m-1", store.clone(), Box::new(FixedDraw::shortest()));

        let init = sim.initialize().await;

        assert!(matches!(init, Initialization::Resumed(_)));
        assert_eq!(sim.state().last_status, SignalStatus::Down);
        assert_eq!(sim.state().down_since, Some(at(10, 58, 0)));
        assert_eq!(store.get_logs("m-1", LogOrder::Ascending).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disabled_simulation_neither_backfills_nor_ticks() {
        let clock = ManualClock::new(at(12, 0, 0));
        let store = setup(false, &clock);
        let mut sim = MachineSimulation::new("m-1", store.clone(), Box::new(FixedDraw::shortest()));

        assert_eq!(sim.initialize().await, Initialization::Idle);
        assert!(matches!(sim.tick().await, TickOutcome::Disabled));
        assert!(store.get_logs("m-1", LogOrder::Ascending).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ticks_outside_working_hours_do_nothing() {
        let clock = ManualClock::new(at(17, 30, 0));
        let store = setup(true, &clock);
        let mut sim = MachineSimulation::new("m-1", store, Box::new(FixedDraw::shortest()));

        assert!(matches!(sim.tick().await, TickOutcome::OutsideHours));
    }

    #[tokio::test]
    async fn running_machine_holds_during_grace_period() {
        let clock = ManualClock::new(at(8, 29, 0));
        let store = setup(true, &clock);
        let mut sim = MachineSimulation::new("m-1", store, Box::new(FixedDraw::shortest()));

        match sim.tick().await {
            TickOutcome::Held { probability } => assert_eq!(probability, 0.0),
            other => panic!("expected hold, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn running_machine_fails_when_draw_is_under_the_odds() {
        let clock = ManualClock::new(at(8, 40, 0));
        let store = setup(true, &clock);
        let mut sim = MachineSimulation::new(
            "m-1",
            store.clone(),
            Box::new(FixedDraw::shortest().with_uniform(0.34)),
        );

        let log = match sim.tick().await {
            TickOutcome::Transitioned(log) => log,
            other => panic!("expected transition, got {other:?}"),
        };
        assert_eq!(log.status, SignalStatus::Down);
        assert_eq!(log.reason, "maintenance");
        assert_eq!(sim.state().down_since, Some(at(8, 40, 0)));
        assert_eq!(sim.state().running_since, None);
        assert_eq!(sim.state().last_log_at, Some(at(8, 40, 0)));
    }

    #[tokio::test]
    async fn running_machine_holds_when_draw_meets_the_odds() {
        let clock = ManualClock::new(at(8, 40, 0));
        let store = setup(true, &clock);
        let mut sim = MachineSimulation::new(
            "m-1",
            store,
            Box::new(FixedDraw::shortest().with_uniform(0.35)),
        );

        match sim.tick().await {
            TickOutcome::Held { probability } => assert_eq!(probability, 0.35),
            other => panic!("expected hold, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn down_machine_recovers_with_step_odds() {
        let clock = ManualClock::new(at(10, 0, 0));
        let store = setup(true, &clock);
        store
            .append_log("m-1", SignalStatus::Down, NaiveTime::from_hms_opt(9, 56, 0).unwrap(), Some("setup"))
            .await
            .unwrap();
        let mut sim = MachineSimulation::new(
            "m-1",
            store.clone(),
            Box::new(FixedDraw::shortest().with_uniform(0.5)),
        );
        sim.initialize().await;

        let log = match sim.tick().await {
            TickOutcome::Transitioned(log) => log,
            other => panic!("expected recovery, got {other:?}"),
        };
        assert_eq!(log.status, SignalStatus::Running);
        assert!(log.reason.is_empty());

        let logs = store.get_logs("m-1", LogOrder::Ascending).await.unwrap();
        assert_eq!(logs[0].duration.as_deref(), Some("4m"));
    }

    #[tokio::test]
    async fn ticks_ten_seconds_apart_append_once() {
        let clock = ManualClock::new(at(9, 0, 0));
        let store = setup(true, &clock);
        let mut sim = MachineSimulation::new("m-1", store.clone(), Box::new(FixedDraw::shortest()));

        assert!(matches!(sim.tick().await, TickOutcome::Transitioned(_)));
        clock.advance(Duration::seconds(10));
        assert!(matches!(sim.tick().await, TickOutcome::RateLimited));

        assert_eq!(store.get_logs("m-1", LogOrder::Ascending).await.unwrap().len(), 1);

        clock.advance(Duration::seconds(60));
        assert!(matches!(sim.tick().await, TickOutcome::Transitioned(_)));
    }

    #[tokio::test]
    async fn duplicate_append_counts_as_no_transition() {
        let clock = ManualClock::new(at(9, 0, 0));
        let store = setup(true, &clock);
        store
            .append_log("m-1", SignalStatus::Running, NaiveTime::from_hms_opt(9, 0, 0).unwrap(), None)
            .await
            .unwrap();
        let mut sim = MachineSimulation::new("m-1", store, Box::new(FixedDraw::shortest()));

        assert!(matches!(
            sim.tick().await,
            TickOutcome::Failed(StoreError::Duplicate { .. })
        ));
        assert_eq!(sim.state().last_status, SignalStatus::Running);
        assert_eq!(sim.state().last_log_at, None);
    }

    #[tokio::test]
    async fn manual_record_updates_the_interval() {
        let clock = ManualClock::new(at(9, 15, 0));
        let store = setup(true, &clock);
        let mut sim = MachineSimulation::new("m-1", store, Box::new(FixedDraw::shortest()));

        let log = sim.record(SignalStatus::Down, Some("operator")).await.unwrap();

        assert_eq!(log.reason, "operator");
        assert_eq!(sim.state().last_status, SignalStatus::Down);
        assert_eq!(sim.state().down_since, Some(at(9, 15, 0)));
    }
}
