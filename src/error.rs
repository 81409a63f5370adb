//! Error taxonomy for backup runs
//!
//! Each variant decides what happens next: configuration and authentication
//! errors stop the process, network and rate-limit errors abort only the
//! current run, and repository errors are recorded and skipped.

use thiserror::Error;

/// Errors surfaced by the lister, the mirror updater and the scheduler
#[derive(Debug, Error)]
pub enum BackupError {
    /// Missing or invalid configuration, detected before any work starts
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The token was rejected by the GitHub API
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The GitHub API signalled throttling
    #[error("GitHub API rate limit exceeded: {0}")]
    RateLimited(String),

    /// Transport failure or unexpected API response
    #[error("network error: {0}")]
    Network(String),

    /// Clone or fetch failure for a single repository
    #[error("repository {name}: {message}")]
    Repository { name: String, message: String },
}

impl BackupError {
    /// Whether the error must stop the process rather than wait for the next run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BackupError::Configuration(_) | BackupError::Authentication(_)
        )
    }

    /// Process exit code used by the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            BackupError::Configuration(_) => 2,
            BackupError::Authentication(_) => 3,
            BackupError::RateLimited(_) | BackupError::Network(_) => 4,
            BackupError::Repository { .. } => 1,
        }
    }
}
