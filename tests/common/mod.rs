//! Common test utilities and helpers for github-backup tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tempfile::TempDir;

use github_backup::{BackupError, Config, MirrorLayout, RepoRecord, RepositorySource};

/// Scratch area holding upstream repositories and a backup root
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub upstream_dir: PathBuf,
    pub backup_dir: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let upstream_dir = temp_dir.path().join("upstream");
        let backup_dir = temp_dir.path().join("backup");
        std::fs::create_dir_all(&upstream_dir).expect("Failed to create upstream dir");

        Self {
            temp_dir,
            upstream_dir,
            backup_dir,
        }
    }

    pub fn config(&self, layout: MirrorLayout) -> Config {
        Config {
            access_token: "ghp_testtoken".to_string(),
            backup_dir: self.backup_dir.clone(),
            backup_interval: Duration::from_secs(5),
            layout,
            api_url: "https://api.github.com".to_string(),
        }
    }

    /// Create an upstream repository with a single commit and return its record
    pub fn create_upstream(&self, owner: &str, name: &str) -> RepoRecord {
        let path = self.upstream_dir.join(owner).join(name);
        std::fs::create_dir_all(&path).expect("Failed to create upstream repo dir");

        git(&path, &["init", "--quiet"]);
        commit(&path, "initial commit");
        git(&path, &["tag", "v1.0"]);

        RepoRecord::new(name, owner, file_url(&path))
    }

    /// A record whose clone URL points at nothing
    pub fn missing_upstream(&self, owner: &str, name: &str) -> RepoRecord {
        let path = self.upstream_dir.join(owner).join(format!("{}-missing", name));
        RepoRecord::new(name, owner, file_url(&path))
    }

    pub fn upstream_path(&self, record: &RepoRecord) -> PathBuf {
        self.upstream_dir.join(&record.owner).join(&record.name)
    }
}

pub fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

/// Run git in `dir`, panicking on failure, and return trimmed stdout
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("Failed to execute git");

    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );

    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Add an empty commit to an upstream repository
pub fn commit(dir: &Path, message: &str) {
    git(
        dir,
        &[
            "-c",
            "user.name=Backup Test",
            "-c",
            "user.email=backup-test@example.com",
            "-c",
            "commit.gpgsign=false",
            "commit",
            "--allow-empty",
            "--quiet",
            "-m",
            message,
        ],
    );
}

/// All refs of a repository as "<sha> <refname>" lines
pub fn refs_of(dir: &Path) -> String {
    git(dir, &["for-each-ref", "--format=%(objectname) %(refname)"])
}

pub fn is_bare(dir: &Path) -> bool {
    dir.is_dir() && git(dir, &["rev-parse", "--is-bare-repository"]) == "true"
}

/// Repository source returning a fixed list
pub struct StaticSource {
    pub records: Vec<RepoRecord>,
}

#[async_trait]
impl RepositorySource for StaticSource {
    async fn list_repositories(&self) -> Result<Vec<RepoRecord>, BackupError> {
        Ok(self.records.clone())
    }

    fn provider_name(&self) -> &'static str {
        "static"
    }
}
