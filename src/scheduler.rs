//! Scheduler - runs a backup, sleeps for the configured interval, repeats
//!
//! The sleep starts when a run finishes, so runs never overlap and a slow run
//! pushes the next one back. There is no jitter and no drift correction.
//! Shutdown is only observed between runs; a run in progress is never
//! interrupted from here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::backup::RunSummary;
use crate::error::BackupError;

/// A unit of work the scheduler repeats
#[async_trait]
pub trait BackupTask: Send + Sync {
    async fn run_once(&self) -> Result<RunSummary, BackupError>;
}

/// Scheduler statistics
#[derive(Debug, Clone, Default)]
pub struct SchedulerStatus {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Fixed-interval scheduler
pub struct Scheduler {
    interval: Duration,
    status: SchedulerStatus,
}

impl Scheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            status: SchedulerStatus::default(),
        }
    }

    pub fn status(&self) -> &SchedulerStatus {
        &self.status
    }

    /// Run `task` repeatedly until `shutdown` completes
    ///
    /// Network and rate-limit failures are logged and retried on the next
    /// interval. Configuration and authentication failures end the loop and
    /// are returned to the caller.
    pub async fn run_until<T, F>(&mut self, task: &T, shutdown: F) -> Result<(), BackupError>
    where
        T: BackupTask + ?Sized,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        info!("Scheduler started with interval: {:?}", self.interval);

        loop {
            self.status.total_runs += 1;
            self.status.last_run_at = Some(Utc::now());
            debug!("Starting scheduled backup run #{}", self.status.total_runs);

            match task.run_once().await {
                Ok(summary) => {
                    self.status.successful_runs += 1;
                    self.log_run_success(&summary);
                }
                Err(e) if e.is_fatal() => {
                    self.status.failed_runs += 1;
                    error!("Backup run failed, stopping: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    self.status.failed_runs += 1;
                    error!(
                        "Backup run aborted: {}; retrying in {}s",
                        e,
                        self.interval.as_secs()
                    );
                }
            }

            if let Ok(delay) = chrono::Duration::from_std(self.interval) {
                info!("Next backup at {}", (Utc::now() + delay).to_rfc3339());
            }

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received, stopping scheduler");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(
            "Scheduler exiting after {} runs ({} successful, {} failed)",
            self.status.total_runs, self.status.successful_runs, self.status.failed_runs
        );
        Ok(())
    }

    fn log_run_success(&self, summary: &RunSummary) {
        if summary.failed > 0 {
            warn!(
                "Run #{} finished with {} of {} repositories failing",
                self.status.total_runs, summary.failed, summary.total_repositories
            );
        } else {
            info!(
                "Run #{} finished: {} repositories backed up",
                self.status.total_runs, summary.total_repositories
            );
        }
    }
}

/// Wait for Ctrl+C, or SIGTERM on Unix
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = ctrl_c() => {}
                    _ = terminate.recv() => debug!("SIGTERM received"),
                }
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => debug!("Ctrl+C received"),
        Err(e) => {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
