use log::{debug, error, warn};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::models::SignalLog;

use super::store::SignalStore;

/// Handle to a live log subscription. Dropping it stops delivery; call
/// [`LogSubscription::unsubscribe`] to also wait for the delivery task to exit.
pub struct LogSubscription {
    machine_id: String,
    cancel_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl LogSubscription {
    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub fn is_active(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Stop delivery and wait until no callback can run anymore. Safe to call
    /// more than once.
    pub async fn unsubscribe(&mut self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    error!(
                        "Log subscription task for machine {} failed: {err}",
                        self.machine_id
                    );
                }
            }
            debug!("Unsubscribed from machine {}", self.machine_id);
        }
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

pub(super) fn spawn_subscription<F>(
    store: SignalStore,
    machine_id: String,
    mut feed: broadcast::Receiver<String>,
    on_change: F,
) -> LogSubscription
where
    F: Fn(Vec<SignalLog>) + Send + Sync + 'static,
{
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();
    let watched = machine_id.clone();

    let handle = tokio::spawn(async move {
        deliver(&store, &watched, &token, &on_change).await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                received = feed.recv() => match received {
                    Ok(changed) if changed == watched => {
                        deliver(&store, &watched, &token, &on_change).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Log subscription for {watched} lagged by {skipped} changes; resyncing");
                        deliver(&store, &watched, &token, &on_change).await;
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });

    LogSubscription {
        machine_id,
        cancel_token,
        handle: Some(handle),
    }
}

async fn deliver<F>(store: &SignalStore, machine_id: &str, token: &CancellationToken, on_change: &F)
where
    F: Fn(Vec<SignalLog>),
{
    match store.today_logs(machine_id).await {
        Ok(logs) => {
            if !token.is_cancelled() {
                on_change(logs);
            }
        }
        Err(err) => warn!("Failed to load snapshot for machine {machine_id}: {err}"),
    }
}
