use std::time::Duration;

use serde::Serialize;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    log_info, log_warn,
    models::{SignalLog, SignalStatus},
    signals::SignalStore,
};

use super::random::{random_reason, Draw};

const ENABLE_LOGS: bool = true;

/// Flat per-machine chance of any transition in one pass.
pub const CHANGE_PROBABILITY: f64 = 0.05;
/// Share of transitions that go down.
pub const DOWN_SKEW: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    Disabled,
    OutsideHours,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleReport {
    pub machines: usize,
    pub appended: Vec<SignalLog>,
    pub skipped: Option<SkipReason>,
}

/// Cheap population-wide simulator: one flat draw per machine per pass, no
/// interval tracking. End times are left to the store's append side effect.
pub struct CoarseSampler {
    store: SignalStore,
    draw: Box<dyn Draw>,
}

impl CoarseSampler {
    pub fn new(store: SignalStore, draw: Box<dyn Draw>) -> Self {
        Self { store, draw }
    }

    /// One pass over `machine_ids`. Safe to call repeatedly.
    pub async fn run_once(&mut self, machine_ids: &[String]) -> SampleReport {
        let mut report = SampleReport {
            machines: machine_ids.len(),
            ..SampleReport::default()
        };

        if !self.store.settings().is_enabled() {
            report.skipped = Some(SkipReason::Disabled);
            return report;
        }
        let now = self.store.clock().time_of_day();
        if !self.store.working_hours().contains(now) {
            report.skipped = Some(SkipReason::OutsideHours);
            return report;
        }

        for machine_id in machine_ids {
            if self.draw.uniform() >= CHANGE_PROBABILITY {
                continue;
            }
            let status = if self.draw.uniform() < DOWN_SKEW {
                SignalStatus::Down
            } else {
                SignalStatus::Running
            };
            let reason = match status {
                SignalStatus::Down => Some(random_reason(self.draw.as_mut())),
                SignalStatus::Running => None,
            };

            match self.store.append_log(machine_id, status, now, reason).await {
                Ok(log) => report.appended.push(log),
                Err(err) => log_warn!("Sampler skipped machine {machine_id}: {err}"),
            }
        }

        log_info!(
            "Sampler processed {} machines, {} transitions",
            report.machines,
            report.appended.len()
        );
        report
    }

    /// Repeat [`CoarseSampler::run_once`] every `period` over the machine
    /// registry until cancelled.
    pub async fn run(mut self, period: Duration, cancel_token: CancellationToken) {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let machine_ids = match self.store.database().list_machines().await {
                        Ok(machines) => machines.into_iter().map(|m| m.serial).collect::<Vec<_>>(),
                        Err(err) => {
                            log_warn!("Sampler could not load machines: {err}");
                            continue;
                        }
                    };
                    self.run_once(&machine_ids).await;
                }
                _ = cancel_token.cancelled() => break,
            }
        }
    }
}
