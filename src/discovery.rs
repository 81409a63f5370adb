//! Repository discovery abstraction layer
//!
//! The backup run only needs a list of `{name, owner, clone_url}` records. The
//! [`RepositorySource`] trait hides where they come from so the run can be
//! driven by the GitHub API in production and by fixtures in tests.

use async_trait::async_trait;
use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::config::MirrorLayout;
use crate::error::BackupError;

/// A repository to mirror, produced fresh on every run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRecord {
    /// Repository name (e.g., "Hello-World")
    pub name: String,

    /// Owner or organization login (e.g., "octocat")
    pub owner: String,

    /// URL handed to `git clone` / `git fetch`
    pub clone_url: String,
}

impl RepoRecord {
    pub fn new(
        name: impl Into<String>,
        owner: impl Into<String>,
        clone_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            clone_url: clone_url.into(),
        }
    }

    /// Display name (owner/name format)
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Path of the mirror relative to the backup root
    ///
    /// Fails when a path component could escape the backup root or collide
    /// with another repository's directory.
    pub fn relative_path(&self, layout: MirrorLayout) -> Result<PathBuf, BackupError> {
        let name = validate_dir_name(&self.name).map_err(|message| BackupError::Repository {
            name: self.full_name(),
            message,
        })?;

        match layout {
            MirrorLayout::Flat => Ok(PathBuf::from(name)),
            MirrorLayout::Owner => {
                let owner =
                    validate_dir_name(&self.owner).map_err(|message| BackupError::Repository {
                        name: self.full_name(),
                        message,
                    })?;
                Ok(PathBuf::from(owner).join(name))
            }
        }
    }
}

fn dir_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[-.\w]+$").expect("directory name pattern is valid"))
}

/// Accept only letters, digits, underscores, periods and hyphens
pub fn validate_dir_name(name: &str) -> Result<&str, String> {
    if name == "." || name == ".." || !dir_name_pattern().is_match(name) {
        return Err(format!("invalid directory name '{}'", name));
    }
    Ok(name)
}

/// Source of the repositories visible to the configured identity
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RepositorySource: Send + Sync {
    /// List every repository, in the provider's default order
    async fn list_repositories(&self) -> Result<Vec<RepoRecord>, BackupError>;

    /// Provider name for display/logging
    fn provider_name(&self) -> &'static str;
}
