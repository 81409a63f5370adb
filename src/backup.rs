//! Backup run - lists repositories and brings every mirror up to date
//!
//! One run is a straight line: ask the [`RepositorySource`] for the current
//! repository list, then hand each record to the [`MirrorUpdater`] in order.
//! A listing failure aborts the run before anything touches the disk; a
//! failure on one repository is recorded and the run moves on.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::discovery::{RepoRecord, RepositorySource};
use crate::error::BackupError;
use crate::git::{find_stale_mirrors, MirrorOutcome, MirrorUpdater};
use crate::github::GitHubClient;
use crate::scheduler::BackupTask;

/// Results from a complete backup run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub total_repositories: usize,
    pub cloned: usize,
    pub fetched: usize,
    pub up_to_date: usize,
    pub failed: usize,
    pub duration: Duration,
    pub outcomes: Vec<MirrorOutcome>,
}

impl RunSummary {
    /// Compile a summary from per-repository outcomes
    pub fn from_outcomes(outcomes: Vec<MirrorOutcome>, duration: Duration) -> Self {
        let mut summary = RunSummary {
            total_repositories: outcomes.len(),
            duration,
            ..Default::default()
        };

        for outcome in &outcomes {
            match outcome {
                MirrorOutcome::Cloned { .. } => summary.cloned += 1,
                MirrorOutcome::Fetched { refs_updated, .. } => {
                    summary.fetched += 1;
                    if *refs_updated == 0 {
                        summary.up_to_date += 1;
                    }
                }
                MirrorOutcome::Failed { .. } => summary.failed += 1,
            }
        }

        summary.outcomes = outcomes;
        summary
    }

    pub fn successful(&self) -> usize {
        self.cloned + self.fetched
    }

    pub fn failures(&self) -> impl Iterator<Item = &MirrorOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.is_failure())
    }
}

/// Drives the lister and the mirror updater for one run
pub struct BackupEngine {
    source: Box<dyn RepositorySource>,
    updater: MirrorUpdater,
}

impl BackupEngine {
    /// Create an engine backed by the GitHub API
    pub fn new(config: &Config) -> Result<Self, BackupError> {
        let source = GitHubClient::new(config)?;
        Ok(Self::with_source(Box::new(source), MirrorUpdater::new(config)))
    }

    /// Create an engine over any repository source
    pub fn with_source(source: Box<dyn RepositorySource>, updater: MirrorUpdater) -> Self {
        Self { source, updater }
    }

    /// List the repositories a run would back up
    pub async fn list(&self) -> Result<Vec<RepoRecord>, BackupError> {
        debug!("Listing repositories from {}", self.source.provider_name());
        self.source.list_repositories().await
    }

    /// Run one complete backup: list, then clone or fetch every repository
    pub async fn run_once(&self) -> Result<RunSummary, BackupError> {
        let start_time = Instant::now();

        info!("Starting backup run");

        let records = self.list().await?;
        info!(
            "Discovered {} repositories from {}",
            records.len(),
            self.source.provider_name()
        );

        let root = self.updater.backup_root();
        tokio::fs::create_dir_all(root).await.map_err(|e| {
            BackupError::Configuration(format!(
                "failed to create backup directory {}: {}",
                root.display(),
                e
            ))
        })?;

        let mut outcomes = Vec::with_capacity(records.len());
        let mut claimed: HashMap<PathBuf, String> = HashMap::new();
        for record in &records {
            let outcome = match self.updater.mirror_path(record) {
                Ok(path) => match claimed.get(&path) {
                    Some(first) => collision(record, &path, first),
                    None => {
                        claimed.insert(path, record.full_name());
                        self.updater.update(record).await
                    }
                },
                // Invalid names are reported by the updater
                Err(_) => self.updater.update(record).await,
            };
            outcomes.push(outcome);
        }

        self.report_stale_mirrors(records).await;

        let summary = RunSummary::from_outcomes(outcomes, start_time.elapsed());

        info!(
            "Backup completed in {:.2}s: {} repos, {} cloned, {} fetched ({} up to date), {} failed",
            summary.duration.as_secs_f64(),
            summary.total_repositories,
            summary.cloned,
            summary.fetched,
            summary.up_to_date,
            summary.failed
        );

        Ok(summary)
    }

    // Mirrors of repositories that vanished upstream are kept, only reported
    async fn report_stale_mirrors(&self, records: Vec<RepoRecord>) {
        let updater = self.updater.clone();
        let scan = tokio::task::spawn_blocking(move || find_stale_mirrors(&updater, &records));

        match scan.await {
            Err(e) => warn!("Stale mirror scan did not complete: {}", e),
            Ok(Err(e)) => warn!("Could not check for stale mirrors: {:#}", e),
            Ok(Ok(stale)) => {
                for path in stale {
                    info!(
                        "{} is no longer listed upstream; keeping the existing mirror",
                        path.display()
                    );
                }
            }
        }
    }
}

/// Two listed repositories resolving to the same directory; the first one keeps it
fn collision(record: &RepoRecord, path: &Path, first: &str) -> MirrorOutcome {
    let error = format!(
        "{} is already used by {} in this run; set BACKUP_LAYOUT=owner to keep repositories with the same name apart",
        path.display(),
        first
    );
    warn!("Skipping {}: {}", record.full_name(), error);

    MirrorOutcome::Failed {
        name: record.full_name(),
        error,
    }
}

#[async_trait]
impl BackupTask for BackupEngine {
    async fn run_once(&self) -> Result<RunSummary, BackupError> {
        BackupEngine::run_once(self).await
    }
}
