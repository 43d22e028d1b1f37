//! Expiry scheduler
//!
//! A background task that periodically lifts expired punishments. It can also
//! be asked to sweep on demand and stops cleanly between sweeps.

use crate::SCHEDULER_TARGET;
use crate::enforcement::{EnforcementError, EnforcementResult, LiftOutcome, PunishmentExecutor};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// State of the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for the next sweep
    Idle,
    /// Lifting due punishments
    Sweeping,
}

/// Request sent to the scheduler task
#[derive(Debug)]
pub enum SchedulerRequest {
    /// Run a sweep now, optionally reporting the result
    SweepNow(Option<oneshot::Sender<SweepReport>>),
    /// Stop the task after the current sweep
    Shutdown,
}

/// Summary of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Cases found due
    pub due: usize,
    /// Cases lifted
    pub lifted: usize,
    /// Cases whose lift failed and will be retried
    pub failed: usize,
    /// Cases given up after too many failures
    pub abandoned: usize,
    /// Cases already lifted or claimed by another attempt
    pub skipped: usize,
}

/// Lifts expired punishments
pub struct ExpiryScheduler {
    executor: Arc<PunishmentExecutor>,
    sweeping: AtomicBool,
}

impl ExpiryScheduler {
    pub fn new(executor: Arc<PunishmentExecutor>) -> Self {
        Self {
            executor,
            sweeping: AtomicBool::new(false),
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        if self.sweeping.load(Ordering::Acquire) {
            SchedulerState::Sweeping
        } else {
            SchedulerState::Idle
        }
    }

    /// Lift every punishment due at `now`
    ///
    /// Each case is lifted independently; one failure does not stop the
    /// sweep. Overlapping sweeps are refused.
    ///
    /// # Errors
    /// Returns an error if a sweep is already running or the due cases cannot
    /// be fetched.
    pub async fn sweep(&self, now: DateTime<Utc>) -> EnforcementResult<SweepReport> {
        if self.sweeping.swap(true, Ordering::AcqRel) {
            return Err(EnforcementError::Conflict("sweep".to_string()));
        }
        let result = self.lift_due(now).await;
        self.sweeping.store(false, Ordering::Release);
        result
    }

    async fn lift_due(&self, now: DateTime<Utc>) -> EnforcementResult<SweepReport> {
        let due = self.executor.store().find_due_punishments(now).await?;
        let mut report = SweepReport {
            due: due.len(),
            ..Default::default()
        };

        for case in &due {
            match self.executor.lift(case).await {
                Ok(LiftOutcome::Lifted) => report.lifted += 1,
                Ok(LiftOutcome::AlreadyLifted | LiftOutcome::Busy) => report.skipped += 1,
                Ok(LiftOutcome::Failed { gave_up: true, .. }) => report.abandoned += 1,
                Ok(LiftOutcome::Failed { gave_up: false, .. }) => report.failed += 1,
                Err(e) => {
                    error!(target: SCHEDULER_TARGET, case_id = %case.id, "Error lifting case: {e}");
                    report.failed += 1;
                }
            }
        }

        if report.due > 0 {
            info!(
                target: SCHEDULER_TARGET,
                due = report.due,
                lifted = report.lifted,
                failed = report.failed,
                abandoned = report.abandoned,
                skipped = report.skipped,
                "Sweep finished"
            );
        } else {
            debug!(target: SCHEDULER_TARGET, "Sweep found nothing due");
        }
        Ok(report)
    }

    /// Start the background task sweeping every `interval`
    pub fn start(self: Arc<Self>, interval: Duration) -> SchedulerHandle {
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(async move {
            self.run(rx, interval).await;
        });
        SchedulerHandle { tx, task }
    }

    async fn run(&self, mut rx: mpsc::Receiver<SchedulerRequest>, period: Duration) {
        info!(
            target: SCHEDULER_TARGET,
            "Starting expiry scheduler with {}s interval",
            period.as_secs()
        );

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                request = rx.recv() => match request {
                    Some(SchedulerRequest::SweepNow(reply)) => {
                        debug!(target: SCHEDULER_TARGET, "Received on-demand sweep request");
                        let report = self.sweep_logged().await;
                        if let Some(reply) = reply {
                            // The requester may have given up waiting
                            let _ = reply.send(report);
                        }
                    }
                    Some(SchedulerRequest::Shutdown) | None => {
                        info!(
                            target: SCHEDULER_TARGET,
                            "Received shutdown request for expiry scheduler"
                        );
                        break;
                    }
                },

                _ = interval.tick() => {
                    self.sweep_logged().await;
                }
            }
        }

        info!(target: SCHEDULER_TARGET, "Expiry scheduler shut down");
    }

    async fn sweep_logged(&self) -> SweepReport {
        match self.sweep(Utc::now()).await {
            Ok(report) => report,
            Err(e) => {
                error!(target: SCHEDULER_TARGET, "Error in expiry sweep: {e}");
                SweepReport::default()
            }
        }
    }
}

/// Sends requests to a running scheduler
#[derive(Clone)]
pub struct SchedulerClient {
    tx: mpsc::Sender<SchedulerRequest>,
}

impl SchedulerClient {
    /// Run a sweep now and wait for its report
    ///
    /// # Errors
    /// Returns an error if the scheduler is no longer running.
    pub async fn sweep_now(&self) -> EnforcementResult<SweepReport> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SchedulerRequest::SweepNow(Some(reply_tx)))
            .await
            .map_err(|e| EnforcementError::Other(format!("Failed to send sweep request: {e}")))?;
        reply_rx
            .await
            .map_err(|e| EnforcementError::Other(format!("Scheduler dropped sweep request: {e}")))
    }
}

/// Handle to the running scheduler task
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerRequest>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Client for sending requests to the task
    #[must_use]
    pub fn client(&self) -> SchedulerClient {
        SchedulerClient {
            tx: self.tx.clone(),
        }
    }

    /// Stop the task, letting an in-flight sweep finish
    pub async fn stop(self) {
        if let Err(e) = self.tx.send(SchedulerRequest::Shutdown).await {
            warn!(target: SCHEDULER_TARGET, "Scheduler already stopped: {e}");
        }
        if let Err(e) = self.task.await {
            error!(target: SCHEDULER_TARGET, "Scheduler task failed: {e}");
        }
    }
}
