//! Live-data polling of an action.
//!
//! The task holds its own copy of the action and watches the session's snapshots. It stops as
//! soon as the session leaves `idle` or moves to another lineage, when its handle is cancelled
//! or dropped, or when nobody receives its results anymore.
use std::time::Duration;

use blink_common::{Action, ExecutionStatus};
use tokio::{
    select,
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, info, warn};

use super::SessionSnapshot;

/// An action re-resolved by the live-data task, tagged with the lineage it was started for.
#[derive(Debug)]
pub struct RefreshedAction {
    pub lineage: u64,
    pub action: Action,
}

/// Owner of a live-data task. Dropping it stops the task.
#[derive(Debug)]
pub struct LiveDataHandle {
    end_tx: Option<oneshot::Sender<()>>,
    jh: JoinHandle<()>,
    updates: mpsc::Receiver<RefreshedAction>,
}

impl LiveDataHandle {
    /// Next refreshed action, or `None` once the task stopped.
    pub async fn next(&mut self) -> Option<RefreshedAction> {
        self.updates.recv().await
    }

    /// Stops the task and waits for it. Undelivered refreshes are dropped.
    pub async fn cancel(mut self) {
        self.updates.close();
        if let Some(tx) = self.end_tx.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.jh).await;
    }

    pub fn is_finished(&self) -> bool {
        self.jh.is_finished()
    }
}

impl Drop for LiveDataHandle {
    fn drop(&mut self) {
        self.jh.abort();
    }
}

fn is_current(snapshot: &SessionSnapshot, lineage: u64) -> bool {
    snapshot.lineage == lineage && snapshot.status == ExecutionStatus::Idle
}

/// Resolves once the task must stop: close signal, or the session left the lineage's `idle`.
async fn stop_requested(
    end_rx: &mut oneshot::Receiver<()>,
    snapshots: &mut watch::Receiver<SessionSnapshot>,
    lineage: u64,
) {
    loop {
        select! {
            _ = &mut *end_rx => {
                debug!("Live data refresh received close signal. Stopping");
                return;
            }
            changed = snapshots.changed() => {
                if changed.is_err() || !is_current(&snapshots.borrow(), lineage) {
                    debug!("Session moved on. Stopping live data refresh");
                    return;
                }
            }
        }
    }
}

pub(super) fn spawn(
    action: Action,
    delay: Duration,
    default_delay: Duration,
    lineage: u64,
    mut snapshots: watch::Receiver<SessionSnapshot>,
) -> LiveDataHandle {
    let (end_tx, mut end_rx) = oneshot::channel::<()>();
    let (tx, updates) = mpsc::channel(1);

    let jh = tokio::spawn(async move {
        let mut action = action;
        let mut delay = delay;
        info!(key = %action.key(), ?delay, "Starting live data refresh");
        loop {
            if !is_current(&snapshots.borrow(), lineage) {
                return;
            }
            select! {
                _ = sleep(delay) => {}
                _ = stop_requested(&mut end_rx, &mut snapshots, lineage) => return,
            }

            let result = select! {
                result = action.refresh() => result,
                _ = stop_requested(&mut end_rx, &mut snapshots, lineage) => return,
            };
            let refreshed = match result {
                Ok(refreshed) => refreshed,
                Err(err) => {
                    warn!(%err, "Failed to refresh live action");
                    continue;
                }
            };
            debug!(key = %refreshed.key(), "Refreshed live action");

            // waits for the consumer, but never past a stop condition
            let permit = select! {
                permit = tx.reserve() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
                _ = stop_requested(&mut end_rx, &mut snapshots, lineage) => return,
            };
            let next_delay = refreshed.live_data_delay_or(default_delay);
            permit.send(RefreshedAction { lineage, action: refreshed.clone() });
            match next_delay {
                Some(next_delay) => {
                    delay = next_delay;
                    action = refreshed;
                }
                None => {
                    info!("Refreshed action disabled live data. Stopping");
                    return;
                }
            }
        }
    });

    LiveDataHandle { end_tx: Some(end_tx), jh, updates }
}
