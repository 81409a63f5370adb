use path_clean::PathClean;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::BackupError;

pub const TOKEN_VAR: &str = "GITHUB_ACCESS_TOKEN";
pub const BACKUP_DIR_VAR: &str = "BACKUP_DIR";
pub const INTERVAL_VAR: &str = "BACKUP_INTERVAL";
pub const LAYOUT_VAR: &str = "BACKUP_LAYOUT";
pub const API_URL_VAR: &str = "GITHUB_API_URL";

// Older names still honoured when the primary variable is unset
const TOKEN_FALLBACK_VAR: &str = "GITHUB_TOKEN";
const BACKUP_DIR_FALLBACK_VAR: &str = "SAVE_DIR";

/// Process-wide configuration, validated once at startup
#[derive(Clone)]
pub struct Config {
    /// GitHub personal access token
    pub access_token: String,

    /// Root directory that holds one bare mirror per repository
    pub backup_dir: PathBuf,

    /// Pause between the end of one run and the start of the next
    pub backup_interval: Duration,

    /// Directory structure of the mirrors under `backup_dir`
    pub layout: MirrorLayout,

    /// GitHub REST API base URL
    pub api_url: String,
}

/// How mirrors are arranged below the backup root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MirrorLayout {
    /// `<backup_dir>/<name>`
    #[default]
    Flat,
    /// `<backup_dir>/<owner>/<name>`
    Owner,
}

impl FromStr for MirrorLayout {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "flat" => Ok(MirrorLayout::Flat),
            "owner" => Ok(MirrorLayout::Owner),
            other => Err(BackupError::Configuration(format!(
                "unknown {} '{}', expected 'flat' or 'owner'",
                LAYOUT_VAR, other
            ))),
        }
    }
}

// Default value functions
fn default_interval() -> Duration {
    Duration::from_secs(3600)
}
fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

impl Config {
    /// Load the env file (if any) into the process environment, then build the config
    ///
    /// An explicit `env_file` must exist. Without one, `./.env` is used when present.
    /// Variables already set in the process take precedence over the file.
    pub fn load(env_file: Option<&Path>) -> Result<Self, BackupError> {
        match env_file {
            Some(path) => {
                dotenvy::from_path(path).map_err(|e| {
                    BackupError::Configuration(format!(
                        "failed to load env file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                info!("Loaded environment from {}", path.display());
            }
            None => match dotenvy::dotenv() {
                Ok(path) => info!("Loaded environment from {}", path.display()),
                Err(e) if e.not_found() => debug!("No .env file found, using process environment"),
                Err(e) => {
                    return Err(BackupError::Configuration(format!(
                        "failed to load .env file: {}",
                        e
                    )))
                }
            },
        }

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build and validate a config from a variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, BackupError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let access_token = read(TOKEN_VAR)
            .or_else(|| read(TOKEN_FALLBACK_VAR))
            .ok_or_else(|| BackupError::Configuration(format!("{} is not set", TOKEN_VAR)))?;

        if !looks_like_github_token(&access_token) {
            warn!(
                "{} doesn't look like a GitHub token (expected a ghp_, gho_, ghs_, ghu_ or github_pat_ prefix)",
                TOKEN_VAR
            );
        }

        let raw_backup_dir = read(BACKUP_DIR_VAR)
            .or_else(|| read(BACKUP_DIR_FALLBACK_VAR))
            .ok_or_else(|| {
                BackupError::Configuration(format!("{} is not set", BACKUP_DIR_VAR))
            })?;
        let backup_dir = expand_path(&raw_backup_dir)?;

        let backup_interval = match read(INTERVAL_VAR) {
            Some(value) => parse_interval(&value)?,
            None => default_interval(),
        };

        let layout = match read(LAYOUT_VAR) {
            Some(value) => value.parse()?,
            None => MirrorLayout::default(),
        };

        let api_url = read(API_URL_VAR)
            .unwrap_or_else(default_api_url)
            .trim_end_matches('/')
            .to_string();

        let config = Self {
            access_token,
            backup_dir,
            backup_interval,
            layout,
            api_url,
        };

        debug!("Configuration loaded: {:?}", config);
        Ok(config)
    }
}

// Keep the token out of logs
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("access_token", &"<redacted>")
            .field("backup_dir", &self.backup_dir)
            .field("backup_interval", &self.backup_interval)
            .field("layout", &self.layout)
            .field("api_url", &self.api_url)
            .finish()
    }
}

fn looks_like_github_token(token: &str) -> bool {
    ["ghp_", "gho_", "ghs_", "ghu_", "github_pat_"]
        .iter()
        .any(|prefix| token.starts_with(prefix))
}

/// Expand `~` and environment variables, then normalise the path
fn expand_path(raw: &str) -> Result<PathBuf, BackupError> {
    let expanded = shellexpand::full(raw).map_err(|e| {
        BackupError::Configuration(format!("failed to expand {} '{}': {}", BACKUP_DIR_VAR, raw, e))
    })?;

    Ok(PathBuf::from(expanded.as_ref()).clean())
}

/// Parse an interval such as "300", "30s", "30m", "1h" or "2d"
pub fn parse_interval(value: &str) -> Result<Duration, BackupError> {
    let value = value.trim().to_lowercase();
    let invalid = || {
        BackupError::Configuration(format!(
            "invalid {} '{}', use seconds or a value like '30m', '1h', '2d'",
            INTERVAL_VAR, value
        ))
    };

    let (digits, multiplier) = if let Some(v) = value.strip_suffix('s') {
        (v, 1)
    } else if let Some(v) = value.strip_suffix('m') {
        (v, 60)
    } else if let Some(v) = value.strip_suffix('h') {
        (v, 3600)
    } else if let Some(v) = value.strip_suffix('d') {
        (v, 86400)
    } else {
        (value.as_str(), 1)
    };

    let seconds = digits
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|v| v.checked_mul(multiplier))
        .ok_or_else(invalid)?;

    if seconds == 0 {
        return Err(BackupError::Configuration(format!(
            "{} must be greater than zero",
            INTERVAL_VAR
        )));
    }

    Ok(Duration::from_secs(seconds))
}
