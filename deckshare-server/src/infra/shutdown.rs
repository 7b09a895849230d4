//! Background tasks that decide when the server stops, plus the periodic
//! upload sweep. Every task exits once the shared token is cancelled.

use std::{sync::Arc, time::Duration};

use deckshare_core::{SweepReport, UploadRegistry};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::activity::ActivityTracker;

const WATCHDOG_TICK: Duration = Duration::from_secs(1);
const MIN_TICK: Duration = Duration::from_millis(10);

/// Cancel `token` once no request has been seen for `timeout`.
pub fn spawn_idle_watchdog(
    tracker: Arc<ActivityTracker>,
    timeout: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    let tick = WATCHDOG_TICK.min(timeout).max(MIN_TICK);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = interval.tick() => {}
            }
            if tracker.is_idle(timeout) {
                info!(
                    idle_secs = tracker.idle_for().as_secs(),
                    "no requests within idle timeout; shutting down"
                );
                token.cancel();
                return;
            }
        }
    })
}

/// Cancel `token` on Ctrl-C.
pub fn spawn_ctrl_c(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    info!("interrupt received; shutting down");
                    token.cancel();
                }
                Err(err) => warn!(error = %err, "failed to listen for ctrl-c"),
            },
        }
    })
}

/// Every `every`, sweep uploads that went a whole interval without a chunk.
/// Stops when `token` is cancelled.
pub fn spawn_periodic_sweep(
    registry: Arc<UploadRegistry>,
    every: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        interval.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = interval.tick() => {}
            }
            let report = registry.sweep_idle(every).await;
            if report != SweepReport::default() {
                info!(
                    deleted = report.deleted,
                    dropped = report.dropped,
                    failed = report.failed,
                    "periodic upload sweep"
                );
            }
        }
    })
}
