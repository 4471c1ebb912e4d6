//! Process-wide offload context.
//!
//! Built once in `main` and shared through the HTTP state. It owns the
//! offload lock, the scheduler slot and the live settings, so "one
//! scheduler per process" does not depend on module-level globals.

use crate::{
    config::OffloadSettings,
    models::offload::CycleOutcome,
    services::{
        lock_service::{LockError, LockStatus, ProcessLock},
        offload_service::{OffloadError, OffloadService},
        scheduler_service::{OffloadScheduler, SchedulerState},
    },
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    /// Offload is switched off in configuration.
    Disabled,
    /// Another process owns the offload lock.
    Contended,
    /// Bucket missing or a placeholder; the lock was handed back.
    Misconfigured,
    /// The lock file could not be opened or locked.
    LockFailed,
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("resume offload is not scheduled in this process")]
    NotOwner,
    #[error("resume offload bucket is not configured")]
    Misconfigured,
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Cycle(#[from] OffloadError),
}

pub struct OffloadContext {
    lock: Arc<dyn ProcessLock>,
    offload: Arc<OffloadService>,
    settings: watch::Sender<OffloadSettings>,
    scheduler: Mutex<Option<OffloadScheduler>>,
}

impl OffloadContext {
    pub fn new(
        lock: Arc<dyn ProcessLock>,
        offload: Arc<OffloadService>,
        settings: OffloadSettings,
    ) -> Self {
        let (settings, _) = watch::channel(settings);
        Self {
            lock,
            offload,
            settings,
            scheduler: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> OffloadSettings {
        self.settings.borrow().clone()
    }

    /// Replace the live settings; the scheduler uses them from its next tick.
    pub fn update_settings(&self, settings: OffloadSettings) {
        self.settings.send_replace(settings);
    }

    /// Take the offload lock and arm the periodic scheduler.
    pub async fn start_scheduler(&self) -> StartOutcome {
        let mut slot = self.scheduler.lock().await;
        if slot.is_some() {
            return StartOutcome::AlreadyRunning;
        }

        let settings = self.settings();
        if !settings.enabled {
            info!("resume offload disabled");
            return StartOutcome::Disabled;
        }

        match self.lock.try_acquire() {
            Ok(LockStatus::Acquired | LockStatus::AlreadyHeld) => {}
            Ok(LockStatus::Contended) => {
                info!("offload scheduler already initialized by another process");
                return StartOutcome::Contended;
            }
            Err(err) => {
                error!(error = %err, "cannot take offload lock, scheduler not started");
                return StartOutcome::LockFailed;
            }
        }

        let Some(bucket) = settings.usable_bucket() else {
            warn!("resume offload is enabled, but the bucket is not set or is a placeholder");
            self.release_lock();
            return StartOutcome::Misconfigured;
        };

        info!(
            bucket,
            interval_secs = settings.interval.as_secs(),
            "resume offload enabled"
        );
        *slot = Some(OffloadScheduler::spawn(
            self.offload.clone(),
            self.settings.subscribe(),
        ));
        StartOutcome::Started
    }

    pub async fn scheduler_state(&self) -> SchedulerState {
        self.scheduler
            .lock()
            .await
            .as_ref()
            .map_or(SchedulerState::Idle, OffloadScheduler::state)
    }

    /// Whether this process currently owns the offload lock.
    pub fn holds_lock(&self) -> bool {
        self.lock.is_held()
    }

    /// Run a cycle right away. Only the process owning the scheduler may.
    pub async fn run_now(&self) -> Result<CycleOutcome, TriggerError> {
        if self.scheduler.lock().await.is_none() {
            return Err(TriggerError::NotOwner);
        }
        let settings = self.settings();
        let bucket = settings.usable_bucket().ok_or(TriggerError::Misconfigured)?;
        Ok(self.offload.run_cycle(&settings.upload_root, bucket).await?)
    }

    /// One-shot cycle for command-line use. Returns `Ok(None)` when offload
    /// is disabled or another process owns the lock.
    pub async fn run_once(&self) -> Result<Option<CycleOutcome>, TriggerError> {
        let settings = self.settings();
        if !settings.enabled {
            info!("resume offload disabled");
            return Ok(None);
        }
        let status = self.lock.try_acquire()?;
        if status == LockStatus::Contended {
            info!("offload lock held by another process, nothing to do");
            return Ok(None);
        }
        // A lock already held belongs to this process's scheduler; leave it.
        let owned_here = status == LockStatus::Acquired;
        let Some(bucket) = settings.usable_bucket() else {
            if owned_here {
                self.release_lock();
            }
            return Err(TriggerError::Misconfigured);
        };

        let result = self.offload.run_cycle(&settings.upload_root, bucket).await;
        if owned_here {
            self.release_lock();
        }
        Ok(Some(result?))
    }

    /// Stop the scheduler if one was started, then release the lock.
    pub async fn shutdown(&self) {
        if let Some(scheduler) = self.scheduler.lock().await.take() {
            info!("stopping offload scheduler");
            scheduler.stop().await;
        }
        self.release_lock();
    }

    fn release_lock(&self) {
        if let Err(err) = self.lock.release() {
            error!(error = %err, "failed to release offload lock");
        }
    }
}
