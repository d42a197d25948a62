//! Background sweep workers
//!
//! Each marker kind gets its own worker that periodically runs the matching
//! sweep on the manager. A tick that arrives while a sweep of the same kind
//! is still running is skipped. Stopping a worker never interrupts a sweep
//! in flight; the worker exits after the current pass. Dropping the handle
//! closes the stop channel, which stops the worker the same way.

use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::manager::BinaryDataManager;
use crate::marker::MarkerKind;

/// Shortest period a worker will tick at
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
/// Longest period a worker will tick at
pub const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Periodic sweep of one marker kind
pub struct SweepWorker {
    manager: BinaryDataManager,
    kind: MarkerKind,
    interval: Duration,
}

impl SweepWorker {
    pub fn new(manager: BinaryDataManager, kind: MarkerKind, interval: Duration) -> Self {
        Self {
            manager,
            kind,
            interval: interval.clamp(MIN_SWEEP_INTERVAL, MAX_SWEEP_INTERVAL),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the worker as a background task (non-blocking)
    pub fn start_background(self) -> SweepHandle {
        info!("Starting {} sweep worker with {}s interval", self.kind, self.interval.as_secs());

        let kind = self.kind;
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            // the manager already swept once on init, so the first tick is one period out
            let mut interval = time::interval_at(Instant::now() + self.interval, self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => self.run_once().await,
                    _ = stop_rx.changed() => break,
                }
            }
            info!("{} sweep worker stopped", self.kind);
        });

        SweepHandle {
            kind,
            stop: stop_tx,
            task,
        }
    }

    async fn run_once(&self) {
        match self.manager.try_sweep(self.kind).await {
            Some(Ok(processed)) => debug!("{} sweep processed {} markers", self.kind, processed),
            Some(Err(e)) => error!("Error during {} sweep: {}", self.kind, e),
            None => warn!("Previous {} sweep still running, skipping this tick", self.kind),
        }
    }
}

/// Handle to a running sweep worker
pub struct SweepHandle {
    kind: MarkerKind,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    pub fn kind(&self) -> MarkerKind {
        self.kind
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the worker to stop and wait for it to exit
    pub async fn stop(self) {
        // the receiver is gone only if the task already ended
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            error!("{} sweep worker terminated abnormally: {}", self.kind, e);
        }
    }
}
