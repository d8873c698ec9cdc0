use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime};
use floorwatch_lib::{
    clock::{Clock, ManualClock},
    db::Database,
    models::SignalStatus,
    settings::{SettingsStore, SimulationSettings},
    signals::{LogOrder, SignalStore, StoreError},
    simulation::{random::FixedDraw, Initialization, MachineSimulation, TickOutcome},
    timeline::{Timeline, TimelineSummary},
};

fn t(hour: u32, minute: u32, second: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, second).unwrap()
}

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

fn enabled() -> Arc<SettingsStore> {
    Arc::new(SettingsStore::ephemeral(SimulationSettings {
        is_enabled: true,
        ..SimulationSettings::default()
    }))
}

#[tokio::test]
async fn a_simulated_morning_projects_onto_the_timeline() {
    let clock = ManualClock::at(monday(), 9, 0, 0);
    let store = SignalStore::new(
        Database::open_in_memory().unwrap(),
        Arc::new(clock.clone()),
        enabled(),
    );
    let mut simulation = MachineSimulation::new("SN-100", store.clone(), Box::new(FixedDraw::shortest()));

    let Initialization::Backfilled(report) = simulation.initialize().await else {
        panic!("expected a backfill at 09:00");
    };
    let times: Vec<_> = report.appended.iter().map(|log| log.timestamp).collect();
    assert_eq!(times, vec![t(8, 0, 0), t(8, 30, 0), t(8, 31, 0)]);
    assert_eq!(report.status, SignalStatus::Running);

    clock.advance(Duration::seconds(30));
    assert!(matches!(simulation.tick().await, TickOutcome::RateLimited));

    clock.set(monday().and_time(t(9, 31, 0)));
    let TickOutcome::Transitioned(down) = simulation.tick().await else {
        panic!("a full hour of running should trip the failure check");
    };
    assert_eq!(down.status, SignalStatus::Down);
    assert!(!down.reason.is_empty());

    let logs = store.get_logs("SN-100", LogOrder::Ascending).await.unwrap();
    assert_eq!(logs.len(), 4);
    assert_eq!(logs[2].end_timestamp, Some(t(9, 31, 0)));
    assert_eq!(logs[2].duration.as_deref(), Some("1h 0m"));
    assert!(logs[3].is_open());

    let window = store.working_hours();
    let timeline = Timeline::new(&logs, window, clock.time_of_day());
    let summary = TimelineSummary::from_timeline(&timeline, window);
    assert!((summary.running_minutes - 90.0).abs() < 1e-9);
    assert!((summary.down_minutes - 1.0).abs() < 1e-9);
    assert!(timeline.segments().last().unwrap().active);
}

#[tokio::test]
async fn admission_rules_reject_without_side_effects() {
    let clock = ManualClock::at(monday(), 10, 0, 0);
    let store = SignalStore::new(
        Database::open_in_memory().unwrap(),
        Arc::new(clock.clone()),
        enabled(),
    );

    let running = store
        .append_log("SN-1", SignalStatus::Running, t(9, 0, 0), Some("ignored"))
        .await
        .unwrap();
    assert_eq!(running.reason, "");

    let late = store
        .append_log("SN-1", SignalStatus::Down, t(17, 0, 1), None)
        .await;
    assert!(matches!(late, Err(StoreError::OutOfHours { .. })));

    let again = store
        .append_log("SN-1", SignalStatus::Down, t(9, 0, 0), None)
        .await;
    assert!(matches!(again, Err(StoreError::Duplicate { .. })));

    let not_down = store.update_reason(&running.id, "SN-1", "setup").await;
    assert!(matches!(not_down, Err(StoreError::NotDown { .. })));

    let logs = store.get_logs("SN-1", LogOrder::Ascending).await.unwrap();
    assert_eq!(logs, vec![running]);
}

#[tokio::test]
async fn logs_and_settings_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("floorwatch.sqlite3");
    let settings_path = dir.path().join("settings.json");
    let clock = ManualClock::at(monday(), 11, 0, 0);

    {
        let settings = Arc::new(SettingsStore::new(settings_path.clone()).unwrap());
        assert!(!settings.is_enabled());
        settings.set_enabled(true).unwrap();
        settings.set_working_hours(t(7, 0, 0), t(15, 30, 0)).unwrap();

        let store = SignalStore::new(
            Database::new(db_path.clone()).unwrap(),
            Arc::new(clock.clone()),
            settings,
        );
        store
            .append_log("SN-2", SignalStatus::Down, t(7, 15, 0), Some("material"))
            .await
            .unwrap();
    }

    let settings = Arc::new(SettingsStore::new(settings_path).unwrap());
    assert!(settings.is_enabled());
    assert_eq!(settings.working_hours().start, t(7, 0, 0));

    let store = SignalStore::new(Database::new(db_path).unwrap(), Arc::new(clock.clone()), settings);
    let latest = store.latest_log("SN-2").await.unwrap().unwrap();
    assert_eq!(latest.reason, "material");

    clock.advance(Duration::days(1));
    let reset = store.reset_day("SN-2").await.unwrap();
    assert_eq!(reset.purged, 1);
    let seeded = reset.seeded.unwrap();
    assert_eq!(seeded.status, SignalStatus::Running);
    assert_eq!(seeded.timestamp, t(7, 0, 0));
}
