//! github-backup - periodic bare-mirror backups of GitHub repositories
//!
//! Lists every repository a personal access token can see and keeps a bare
//! git mirror of each one in a local backup directory, refreshing them on a
//! fixed interval.
//!
//! ## Modules
//!
//! - [`config`]: Environment / `.env` configuration, validated at startup
//! - [`discovery`]: Repository records and the listing abstraction
//! - [`github`]: GitHub API listing
//! - [`git`]: Bare clone / fetch of individual mirrors
//! - [`backup`]: One complete backup run
//! - [`scheduler`]: Fixed-interval repetition of backup runs

pub mod backup;
pub mod config;
pub mod discovery;
pub mod error;
pub mod git;
pub mod github;
pub mod scheduler;

pub use backup::{BackupEngine, RunSummary};
pub use config::{Config, MirrorLayout};
pub use discovery::{RepoRecord, RepositorySource};
pub use error::BackupError;
pub use git::{MirrorOutcome, MirrorUpdater};
pub use github::GitHubClient;
pub use scheduler::{BackupTask, Scheduler};
