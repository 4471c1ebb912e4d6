//! Periodic offload loop.
//!
//! One tokio task per process, started only where the offload lock was won.
//! Cycles run one after another inside the task, each one fed the settings
//! current at that tick.

use crate::{
    config::OffloadSettings,
    models::offload::CycleOutcome,
    services::offload_service::{OffloadError, OffloadService},
};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior, interval_at, sleep},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Armed,
    Running,
    Shutdown,
}

pub struct OffloadScheduler {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    state: watch::Receiver<SchedulerState>,
}

impl OffloadScheduler {
    /// Arm the loop. The first cycle fires one interval after this call.
    pub fn spawn(offload: Arc<OffloadService>, settings: watch::Receiver<OffloadSettings>) -> Self {
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(SchedulerState::Armed);
        let handle = tokio::spawn(run_loop(offload, settings, state_tx, cancel.clone()));
        Self {
            cancel,
            handle,
            state: state_rx,
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Stop the loop, waiting for a cycle in progress to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.handle.await {
            error!(error = %err, "offload scheduler task ended abnormally");
        }
    }
}

async fn run_loop(
    offload: Arc<OffloadService>,
    mut settings: watch::Receiver<OffloadSettings>,
    state: watch::Sender<SchedulerState>,
    cancel: CancellationToken,
) {
    let mut period = settings.borrow().interval;
    let mut ticker = new_ticker(period);
    info!(interval_secs = period.as_secs(), "offload scheduler armed");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let snapshot = settings.borrow_and_update().clone();
        state.send_replace(SchedulerState::Running);
        let result = run_scheduled_cycle(&offload, &snapshot).await;
        state.send_replace(SchedulerState::Armed);

        // Bucket setup failures get one early retry instead of a full interval.
        if matches!(result, Err(OffloadError::Connect { .. })) {
            info!(
                retry_in_secs = snapshot.retry_delay.as_secs(),
                "retrying offload cycle after bucket setup failure"
            );
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(snapshot.retry_delay) => {}
            }
            let retry = settings.borrow_and_update().clone();
            state.send_replace(SchedulerState::Running);
            let _ = run_scheduled_cycle(&offload, &retry).await;
            state.send_replace(SchedulerState::Armed);
        }

        if snapshot.interval != period {
            period = snapshot.interval;
            ticker = new_ticker(period);
            info!(interval_secs = period.as_secs(), "offload interval changed");
        }
    }

    state.send_replace(SchedulerState::Shutdown);
    info!("offload scheduler stopped");
}

fn new_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Run one cycle with `settings`. Errors are logged here and handed back
/// so the loop can decide whether to retry early.
pub async fn run_scheduled_cycle(
    offload: &OffloadService,
    settings: &OffloadSettings,
) -> Result<Option<CycleOutcome>, OffloadError> {
    if !settings.enabled {
        info!("resume offload disabled, skipping cycle");
        return Ok(None);
    }
    let Some(bucket) = settings.usable_bucket() else {
        warn!("offload bucket is not set or is a placeholder, skipping cycle");
        return Ok(None);
    };
    offload
        .run_cycle(&settings.upload_root, bucket)
        .await
        .map(Some)
        .inspect_err(|err| error!(error = %err, "offload cycle failed"))
}
