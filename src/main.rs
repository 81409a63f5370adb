use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use github_backup::git::ensure_git_available;
use github_backup::scheduler::wait_for_shutdown_signal;
use github_backup::{BackupEngine, BackupError, Config, MirrorOutcome, Scheduler};

#[derive(Parser)]
#[command(name = "github-backup")]
#[command(about = "Mirror every GitHub repository a token can see as bare git repositories")]
#[command(version)]
struct Cli {
    /// Run one backup now and exit instead of running on the interval
    #[arg(short, long, conflicts_with = "list")]
    backup: bool,

    /// List the repositories that would be backed up and exit
    #[arg(short, long)]
    list: bool,

    /// Path to the .env file (defaults to ./.env when present)
    #[arg(short, long, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);
    info!("Starting github-backup v{}", env!("CARGO_PKG_VERSION"));

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout is reserved for command output
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<(), BackupError> {
    let config = Config::load(cli.env_file.as_deref())?;
    let engine = BackupEngine::new(&config)?;

    if cli.list {
        return cmd_list(&engine).await;
    }

    let git_version = ensure_git_available().await?;
    info!("Using {}", git_version);
    info!("Backing up into {}", config.backup_dir.display());

    if cli.backup {
        cmd_backup(&engine).await
    } else {
        cmd_schedule(&engine, &config).await
    }
}

/// List repositories that would be backed up
async fn cmd_list(engine: &BackupEngine) -> Result<(), BackupError> {
    let records = engine.list().await?;

    println!("Repositories ({}):", records.len());
    for record in records {
        println!("  {}  {}", record.full_name(), record.clone_url);
    }

    Ok(())
}

/// Run a single backup and report the outcome
async fn cmd_backup(engine: &BackupEngine) -> Result<(), BackupError> {
    let summary = engine.run_once().await?;

    println!("Backup complete");
    println!("   Total repositories: {}", summary.total_repositories);
    println!("   Cloned: {}", summary.cloned);
    println!(
        "   Fetched: {} ({} up to date)",
        summary.fetched, summary.up_to_date
    );
    println!("   Failed: {}", summary.failed);
    println!("   Duration: {:.2}s", summary.duration.as_secs_f64());

    if summary.failed > 0 {
        println!("\nFailed repositories:");
        for outcome in summary.failures() {
            if let MirrorOutcome::Failed { name, error } = outcome {
                println!("   {}: {}", name, error);
            }
        }
    }

    Ok(())
}

/// Back up now, then again after every interval until terminated
async fn cmd_schedule(engine: &BackupEngine, config: &Config) -> Result<(), BackupError> {
    let mut scheduler = Scheduler::new(config.backup_interval);
    scheduler
        .run_until(engine, wait_for_shutdown_signal())
        .await
}
