use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, MirrorLayout};
use crate::discovery::RepoRecord;
use crate::error::BackupError;

/// Keeps one bare mirror per repository under the backup root
#[derive(Clone)]
pub struct MirrorUpdater {
    backup_root: PathBuf,
    layout: MirrorLayout,
    access_token: String,
}

/// Result of updating a single mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorOutcome {
    /// No mirror existed; a fresh bare clone was made
    Cloned { name: String, path: PathBuf },
    /// Existing mirror was fetched; zero updated refs means it was up to date
    Fetched {
        name: String,
        path: PathBuf,
        refs_updated: usize,
    },
    /// Clone or fetch failed; the rest of the run carries on
    Failed { name: String, error: String },
}

impl MirrorOutcome {
    pub fn name(&self) -> &str {
        match self {
            MirrorOutcome::Cloned { name, .. }
            | MirrorOutcome::Fetched { name, .. }
            | MirrorOutcome::Failed { name, .. } => name,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, MirrorOutcome::Failed { .. })
    }
}

impl MirrorUpdater {
    /// Create an updater writing below the configured backup directory
    pub fn new(config: &Config) -> Self {
        Self {
            backup_root: config.backup_dir.clone(),
            layout: config.layout,
            access_token: config.access_token.clone(),
        }
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Get the on-disk mirror directory for a repository
    pub fn mirror_path(&self, record: &RepoRecord) -> Result<PathBuf, BackupError> {
        Ok(self.backup_root.join(record.relative_path(self.layout)?))
    }

    /// Clone or fetch a repository, folding any failure into the outcome
    pub async fn update(&self, record: &RepoRecord) -> MirrorOutcome {
        match self.try_update(record).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let error = match e {
                    BackupError::Repository { message, .. } => message,
                    other => other.to_string(),
                };
                warn!("Failed to back up {}: {}", record.full_name(), error);
                MirrorOutcome::Failed {
                    name: record.full_name(),
                    error,
                }
            }
        }
    }

    async fn try_update(&self, record: &RepoRecord) -> Result<MirrorOutcome, BackupError> {
        let path = self.mirror_path(record)?;
        let name = record.full_name();
        let repo_error = |message: String| BackupError::Repository {
            name: name.clone(),
            message,
        };

        if record.clone_url.is_empty() {
            return Err(repo_error("No clone URL provided by the API".to_string()));
        }

        if is_bare_repository(&path).await {
            if let Some(origin) = origin_url(&path).await {
                if origin != record.clone_url {
                    return Err(repo_error(format!(
                        "{} mirrors {}, not {}; set BACKUP_LAYOUT=owner to keep repositories with the same name apart",
                        path.display(),
                        origin,
                        record.clone_url
                    )));
                }
            }

            info!("Fetching updates: {} at {}", name, path.display());
            let refs_updated = self
                .fetch_mirror(record, &path)
                .await
                .map_err(|e| repo_error(self.mask(format!("{:#}", e))))?;

            if refs_updated == 0 {
                info!("Already up to date: {}", name);
            } else {
                info!("Updated {} refs in {}", refs_updated, name);
            }
            return Ok(MirrorOutcome::Fetched {
                name,
                path,
                refs_updated,
            });
        }

        let existed = path.exists();
        if existed && !is_empty_dir(&path).await {
            return Err(repo_error(format!(
                "{} exists but is not a bare repository; leaving it untouched",
                path.display()
            )));
        }

        info!("Cloning repository: {} -> {}", name, path.display());
        if let Err(e) = self.clone_mirror(record, &path).await {
            // Leave nothing half-written behind so the next run clones again
            if !existed && path.exists() {
                if let Err(cleanup) = tokio::fs::remove_dir_all(&path).await {
                    warn!("Failed to remove partial clone {}: {}", path.display(), cleanup);
                }
            }
            return Err(repo_error(self.mask(format!("{:#}", e))));
        }

        info!("Successfully cloned: {}", name);
        Ok(MirrorOutcome::Cloned { name, path })
    }

    /// Bare-clone a repository into `path`
    #[instrument(skip(self, record, path), fields(repo = %record.full_name(), path = %path.display()))]
    pub async fn clone_mirror(&self, record: &RepoRecord, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create parent directory {}", parent.display()))?;
        }

        let mut cmd = git_command();
        cmd.envs(auth_env(&record.clone_url, &self.access_token))
            .args(["clone", "--bare", "--quiet"])
            .arg(&record.clone_url)
            .arg(path);
        run_git(cmd, "git clone --bare").await?;

        debug!("git clone --bare succeeded");
        Ok(())
    }

    /// Fetch all branches and tags into an existing bare mirror
    ///
    /// Returns the number of refs that changed.
    #[instrument(skip(self, record, path), fields(repo = %record.full_name(), path = %path.display()))]
    pub async fn fetch_mirror(&self, record: &RepoRecord, path: &Path) -> Result<usize> {
        let mut cmd = git_command();
        cmd.envs(auth_env(&record.clone_url, &self.access_token))
            .arg("-C")
            .arg(path)
            .args(["fetch", "--prune", "--force", "--no-write-fetch-head"])
            .arg(&record.clone_url)
            .args(["+refs/heads/*:refs/heads/*", "+refs/tags/*:refs/tags/*"]);
        let stderr = run_git(cmd, "git fetch").await?;

        let refs_updated = count_updated_refs(&stderr);
        debug!(refs_updated, "git fetch complete");
        Ok(refs_updated)
    }

    fn mask(&self, text: String) -> String {
        mask_token(&text, &self.access_token)
    }
}

/// Check whether `path` looks like a bare git repository
///
/// A bare repo is a directory holding a `HEAD` file and an `objects`
/// directory. This is a lightweight heuristic, not an integrity check.
pub async fn is_bare_repository(path: &Path) -> bool {
    let head_is_file = tokio::fs::metadata(path.join("HEAD"))
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    let objects_is_dir = tokio::fs::metadata(path.join("objects"))
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);

    head_is_file && objects_is_dir
}

async fn is_empty_dir(path: &Path) -> bool {
    match tokio::fs::read_dir(path).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => false,
    }
}

/// Verify that the `git` executable can be run, returning its version line
pub async fn ensure_git_available() -> Result<String, BackupError> {
    let output = git_command()
        .arg("--version")
        .output()
        .await
        .map_err(|e| BackupError::Configuration(format!("git executable not found: {}", e)))?;

    if !output.status.success() {
        return Err(BackupError::Configuration(format!(
            "git --version failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    debug!("Using {}", version);
    Ok(version)
}

/// `origin` URL recorded in a mirror, if it has one
async fn origin_url(path: &Path) -> Option<String> {
    let mut cmd = git_command();
    cmd.arg("-C")
        .arg(path)
        .args(["config", "--get", "remote.origin.url"]);

    let output = cmd.output().await.ok()?;
    if !output.status.success() {
        return None;
    }

    let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!url.is_empty()).then_some(url)
}

/// Environment that authenticates git's http(s) requests to the clone URL's host
///
/// The token is handed over as an `http.<url>.extraHeader` through the
/// `GIT_CONFIG_*` variables (git 2.31+), so it never appears in the process
/// arguments or in the mirror's config. Non-http URLs get no credentials.
pub fn auth_env(clone_url: &str, token: &str) -> Vec<(String, String)> {
    let Some((scheme, rest)) = clone_url.split_once("://") else {
        return Vec::new();
    };

    let scheme = scheme.to_ascii_lowercase();
    if token.is_empty() || !(scheme == "https" || scheme == "http") {
        return Vec::new();
    }

    let authority = &rest[..rest.find('/').unwrap_or(rest.len())];
    let host = authority
        .rsplit_once('@')
        .map(|(_, host)| host)
        .unwrap_or(authority);

    let credentials = STANDARD.encode(format!("x-access-token:{}", token));

    vec![
        ("GIT_CONFIG_COUNT".to_string(), "1".to_string()),
        (
            "GIT_CONFIG_KEY_0".to_string(),
            format!("http.{}://{}/.extraHeader", scheme, host),
        ),
        (
            "GIT_CONFIG_VALUE_0".to_string(),
            format!("Authorization: Basic {}", credentials),
        ),
    ]
}

fn mask_token(text: &str, token: &str) -> String {
    if token.is_empty() {
        text.to_string()
    } else {
        text.replace(token, "***")
    }
}

/// Count the ref-update lines in `git fetch` stderr
fn count_updated_refs(stderr: &str) -> usize {
    stderr
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            trimmed.contains("->") && !trimmed.starts_with("From")
        })
        .count()
}

fn git_command() -> AsyncCommand {
    let mut cmd = AsyncCommand::new("git");
    cmd.env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

/// Run a prepared git command, returning its stderr on success
async fn run_git(mut cmd: AsyncCommand, what: &str) -> Result<String> {
    let output = cmd
        .output()
        .await
        .with_context(|| format!("Failed to execute {}", what))?;

    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if !output.status.success() {
        bail!("{} failed ({}): {}", what, output.status, stderr.trim());
    }

    Ok(stderr)
}

/// Mirror directories under the backup root that the current listing no longer includes
pub fn find_stale_mirrors(
    updater: &MirrorUpdater,
    records: &[RepoRecord],
) -> Result<Vec<PathBuf>> {
    let expected: std::collections::HashSet<PathBuf> = records
        .iter()
        .filter_map(|record| updater.mirror_path(record).ok())
        .collect();

    let depth = match updater.layout {
        MirrorLayout::Flat => 1,
        MirrorLayout::Owner => 2,
    };

    let mut stale = Vec::new();
    collect_mirror_dirs(&updater.backup_root, depth, &mut |path| {
        if !expected.contains(path) {
            stale.push(path.to_path_buf());
        }
    })
    .map_err(|e| anyhow!("Failed to scan {}: {}", updater.backup_root.display(), e))?;

    stale.sort();
    Ok(stale)
}

fn collect_mirror_dirs(
    dir: &Path,
    depth: usize,
    visit: &mut dyn FnMut(&Path),
) -> std::io::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        if depth <= 1 {
            if path.join("HEAD").is_file() && path.join("objects").is_dir() {
                visit(&path);
            }
        } else {
            collect_mirror_dirs(&path, depth - 1, visit)?;
        }
    }

    Ok(())
}
