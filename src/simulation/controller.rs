use std::{sync::Arc, time::Duration};

use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    log_error, log_info,
    models::{SignalLog, SignalStatus},
    signals::{LogSubscription, SignalStore, StoreError},
};

use super::{
    engine::{Initialization, MachineSimulation, SimulationState, TickOutcome},
    random::{Draw, RngDraw},
};

const ENABLE_LOGS: bool = true;
const DEFAULT_INTERVAL_SECS: u64 = 60;

pub type DrawFactory = Arc<dyn Fn() -> Box<dyn Draw> + Send + Sync>;

struct ActiveMachine {
    simulation: Arc<Mutex<MachineSimulation>>,
    cancel_token: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    subscription: LogSubscription,
}

/// Drives the simulation for the currently selected machine: backfill on
/// selection, a live-tick loop, a duration-refresh loop and the log
/// subscription. Selecting another machine tears all of that down first.
#[derive(Clone)]
pub struct SimulationController {
    store: SignalStore,
    draws: DrawFactory,
    active: Arc<Mutex<Option<ActiveMachine>>>,
    tick_interval: Duration,
    refresh_interval: Duration,
}

impl SimulationController {
    pub fn new(store: SignalStore) -> Self {
        let interval_secs = std::env::var("FLOORWATCH_TICK_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_INTERVAL_SECS);
        let interval = Duration::from_secs(interval_secs);

        Self::with_intervals(
            store,
            Arc::new(|| Box::new(RngDraw::from_entropy()) as Box<dyn Draw>),
            interval,
            interval,
        )
    }

    pub fn with_intervals(
        store: SignalStore,
        draws: DrawFactory,
        tick_interval: Duration,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            store,
            draws,
            active: Arc::new(Mutex::new(None)),
            tick_interval,
            refresh_interval,
        }
    }

    pub fn store(&self) -> &SignalStore {
        &self.store
    }

    /// Make `machine_id` the simulated machine. `on_change` receives today's
    /// logs, newest first, now and after every change.
    pub async fn select_machine<F>(&self, machine_id: &str, on_change: F) -> Initialization
    where
        F: Fn(Vec<SignalLog>) + Send + Sync + 'static,
    {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            shutdown(previous).await;
        }

        let mut simulation =
            MachineSimulation::new(machine_id, self.store.clone(), (self.draws)());
        let init = simulation.initialize().await;
        log_info!("Selected machine {machine_id}");

        let simulation = Arc::new(Mutex::new(simulation));
        let cancel_token = CancellationToken::new();
        let subscription = self.store.subscribe_logs(machine_id, on_change);
        let workers = vec![
            self.spawn_ticker(simulation.clone(), cancel_token.clone()),
            self.spawn_refresher(machine_id.to_string(), cancel_token.clone()),
        ];

        *active = Some(ActiveMachine {
            simulation,
            cancel_token,
            workers,
            subscription,
        });
        init
    }

    /// Stop simulating. Idempotent.
    pub async fn deselect(&self) {
        if let Some(previous) = self.active.lock().await.take() {
            shutdown(previous).await;
        }
    }

    pub async fn active_machine(&self) -> Option<String> {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(machine) => Some(machine.simulation.lock().await.machine_id().to_string()),
            None => None,
        }
    }

    pub async fn state(&self) -> Option<SimulationState> {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(machine) => Some(machine.simulation.lock().await.state().clone()),
            None => None,
        }
    }

    /// Record a user-initiated status change on the selected machine.
    pub async fn record(
        &self,
        status: SignalStatus,
        reason: Option<&str>,
    ) -> Option<Result<SignalLog, StoreError>> {
        let active = self.active.lock().await;
        let machine = active.as_ref()?;
        let mut simulation = machine.simulation.lock().await;
        Some(simulation.record(status, reason).await)
    }

    fn spawn_ticker(
        &self,
        simulation: Arc<Mutex<MachineSimulation>>,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        let period = self.tick_interval;
        tokio::spawn(async move {
            let mut interval = time::interval_at(time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let mut guard = simulation.lock().await;
                        if let TickOutcome::Transitioned(log) = guard.tick().await {
                            log_info!(
                                "Live tick moved {} to {}",
                                guard.machine_id(),
                                log.status.as_str()
                            );
                        }
                    }
                    _ = cancel_token.cancelled() => break,
                }
            }
        })
    }

    fn spawn_refresher(&self, machine_id: String, cancel_token: CancellationToken) -> JoinHandle<()> {
        let period = self.refresh_interval;
        let store = self.store.clone();
        tokio::spawn(async move {
            let mut interval = time::interval_at(time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(err) = store.recompute_durations(&machine_id).await {
                            log_error!("Duration refresh for {machine_id} failed: {err}");
                        }
                    }
                    _ = cancel_token.cancelled() => break,
                }
            }
        })
    }
}

async fn shutdown(mut machine: ActiveMachine) {
    machine.cancel_token.cancel();
    for worker in machine.workers.drain(..) {
        if let Err(err) = worker.await {
            log_error!("Simulation worker failed to join: {err}");
        }
    }
    machine.subscription.unsubscribe().await;
    log_info!("Stopped simulating {}", machine.subscription.machine_id());
}
