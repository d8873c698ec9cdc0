use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{
    log_info, log_warn,
    machines::{export_csv, import_csv},
    models::{SignalLog, SignalStatus},
    settings::WorkingHours,
    signals::LogOrder,
    simulation::{random::RngDraw, CoarseSampler, Initialization, SimulationController},
    timeline::{hourly_labels, HourLabel, Timeline, TimelineSegment, TimelineSummary},
    AppState,
};

const ENABLE_LOGS: bool = true;
const SETTINGS_POLL: Duration = Duration::from_secs(2);

/// Factory-floor signal log and machine simulator.
#[derive(Parser, Debug)]
#[command(name = "floorwatch", version, about, long_about = None)]
pub struct Cli {
    /// Directory holding the database and settings file.
    #[arg(long, global = true, default_value = "./floorwatch-data")]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Select a machine and run the live simulation until Ctrl-C.
    Simulate { machine: String },
    /// Coarse population pass over every registered machine.
    Sample {
        /// Keep sampling at this period (seconds) until Ctrl-C.
        #[arg(long)]
        every: Option<u64>,
    },
    /// Import machines from a telemetry CSV sheet.
    Import { path: PathBuf },
    /// Export the machine registry as CSV.
    Export { path: PathBuf },
    /// List registered machines.
    Machines,
    /// Print a machine's logs as JSON.
    Logs {
        machine: String,
        #[arg(long)]
        desc: bool,
    },
    /// Print today's timeline projection as JSON.
    Timeline { machine: String },
    /// Record a status change.
    Record {
        machine: String,
        status: StatusArg,
        /// Time of day, `HH:MM[:SS]`. Defaults to now.
        #[arg(long, value_parser = parse_clock_time)]
        at: Option<NaiveTime>,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Change the reason on a downtime log.
    Reason {
        machine: String,
        log_id: String,
        reason: String,
    },
    /// Drop previous days and seed today's opening log.
    Reset { machine: String },
    /// Show or change simulation settings.
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusArg {
    Running,
    Down,
}

impl From<StatusArg> for SignalStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Running => SignalStatus::Running,
            StatusArg::Down => SignalStatus::Down,
        }
    }
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[arg(long, conflicts_with = "disable")]
    enable: bool,
    #[arg(long)]
    disable: bool,
    #[arg(long, requires = "end", value_parser = parse_clock_time)]
    start: Option<NaiveTime>,
    #[arg(long, requires = "start", value_parser = parse_clock_time)]
    end: Option<NaiveTime>,
}

fn parse_clock_time(value: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|err| format!("expected HH:MM or HH:MM:SS ({err})"))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TimelineView<'a> {
    machine_id: &'a str,
    window: WorkingHours,
    labels: Vec<HourLabel>,
    segments: Vec<TimelineSegment<'a>>,
    summary: TimelineSummary,
    uptime_ratio: f64,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{text}");
    Ok(())
}

pub(crate) async fn dispatch(app: &AppState, command: Command) -> Result<()> {
    match command {
        Command::Simulate { machine } => simulate(app, &machine).await,
        Command::Sample { every } => sample(app, every).await,
        Command::Import { path } => {
            let report = import_csv(&app.db, &path).await?;
            print_json(&report)
        }
        Command::Export { path } => {
            let machines = export_csv(&app.db, &path).await?;
            println!("Exported {} machines to {}", machines.len(), path.display());
            Ok(())
        }
        Command::Machines => print_json(&app.db.list_machines().await?),
        Command::Logs { machine, desc } => {
            let order = if desc {
                LogOrder::Descending
            } else {
                LogOrder::Ascending
            };
            print_json(&app.store.get_logs(&machine, order).await?)
        }
        Command::Timeline { machine } => timeline(app, &machine).await,
        Command::Record {
            machine,
            status,
            at,
            reason,
        } => {
            let status = SignalStatus::from(status);
            let reason = reason.as_deref();
            let log = match at {
                Some(at) => app.store.append_log(&machine, status, at, reason).await?,
                None => app.store.append_now(&machine, status, reason).await?,
            };
            app.store.recompute_durations(&machine).await?;
            print_json(&log)
        }
        Command::Reason {
            machine,
            log_id,
            reason,
        } => print_json(&app.store.update_reason(&log_id, &machine, &reason).await?),
        Command::Reset { machine } => {
            let outcome = app.store.reset_day(&machine).await?;
            println!(
                "Purged {} old logs; {}",
                outcome.purged,
                match outcome.seeded {
                    Some(log) => format!("seeded {} at {}", log.status.as_str(), log.timestamp),
                    None => "today already has logs".to_string(),
                }
            );
            Ok(())
        }
        Command::Config(args) => configure(app, args),
    }
}

fn configure(app: &AppState, args: ConfigArgs) -> Result<()> {
    if args.enable || args.disable {
        app.settings.set_enabled(args.enable)?;
    }
    if let (Some(start), Some(end)) = (args.start, args.end) {
        app.settings.set_working_hours(start, end)?;
    }
    print_json(&app.settings.simulation())
}

async fn timeline(app: &AppState, machine: &str) -> Result<()> {
    app.store.recompute_durations(machine).await?;
    let logs = app.store.today_logs(machine).await?;
    let window = app.store.working_hours();
    let projection = Timeline::new(&logs, window, app.store.clock().time_of_day());
    let summary = TimelineSummary::from_timeline(&projection, window);

    print_json(&TimelineView {
        machine_id: machine,
        window,
        labels: hourly_labels(window),
        segments: projection.segments().collect(),
        uptime_ratio: summary.uptime_ratio(),
        summary,
    })
}

async fn simulate(app: &AppState, machine: &str) -> Result<()> {
    if !app.settings.is_enabled() {
        log_warn!("Simulation is disabled; only existing logs will be shown");
    }

    let controller = SimulationController::new(app.store.clone());
    let init = controller
        .select_machine(machine, |logs: Vec<SignalLog>| {
            if let Some(latest) = logs.first() {
                log_info!(
                    "{} logs today; latest {} at {}",
                    logs.len(),
                    latest.status.as_str(),
                    latest.timestamp
                );
            }
        })
        .await;
    match &init {
        Initialization::Backfilled(report) => log_info!(
            "Backfilled {} logs, now {}",
            report.appended.len(),
            report.status.as_str()
        ),
        Initialization::Resumed(latest) => log_info!(
            "Resuming from {} at {}",
            latest.status.as_str(),
            latest.timestamp
        ),
        Initialization::Idle => log_info!("Nothing to backfill right now"),
    }

    let mut settings = app.settings.subscribe();
    let mut reload = tokio::time::interval(SETTINGS_POLL);
    reload.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                break;
            }
            _ = reload.tick() => {
                // `floorwatch config` runs in another process and only rewrites the file.
                app.settings.refresh();
            }
            changed = settings.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = settings.borrow_and_update().clone();
                log_info!(
                    "Simulation {} ({} - {})",
                    if current.is_enabled { "enabled" } else { "disabled" },
                    current.working_hours_start,
                    current.working_hours_end
                );
            }
        }
    }

    controller.deselect().await;
    Ok(())
}

async fn sample(app: &AppState, every: Option<u64>) -> Result<()> {
    let mut sampler = CoarseSampler::new(app.store.clone(), Box::new(RngDraw::from_entropy()));

    let Some(secs) = every else {
        let machine_ids: Vec<String> = app
            .db
            .list_machines()
            .await?
            .into_iter()
            .map(|machine| machine.serial)
            .collect();
        let report = sampler.run_once(&machine_ids).await;
        return print_json(&report);
    };
    if secs == 0 {
        bail!("--every must be at least one second");
    }

    let cancel_token = CancellationToken::new();
    let worker = tokio::spawn(sampler.run(Duration::from_secs(secs), cancel_token.clone()));
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    cancel_token.cancel();
    worker.await.context("sampler task failed")?;
    Ok(())
}
