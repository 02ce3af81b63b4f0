//! App Backup - Main entry point
//!
//! Backs up a list of packages with the local device primitives and prints
//! the task summary as JSON.

use anyhow::{Context, Result};
use app_backup::catalog::{JsonCatalogStore, RetentionStrategy};
use app_backup::daemon::shutdown::ShutdownCoordinator;
use app_backup::primitives::{LocalFs, SettingsToggles, TarArchiver};
use app_backup::model::refresh_sizes;
use app_backup::{utils, Config, PackageDescriptor, TaskController};
use clap::Parser;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// JSON array of packages to back up
    #[arg(short, long, value_name = "FILE")]
    packages: PathBuf,

    /// Retention strategy (cover, versioned); overrides config
    #[arg(short, long)]
    strategy: Option<RetentionStrategy>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Initialize logging
    utils::logger::init(&config.log, args.log_level.as_deref())?;

    tracing::info!(
        "Starting app-backup v{} (device: {})",
        env!("CARGO_PKG_VERSION"),
        config.agent.device_name
    );

    if !nix::unistd::geteuid().is_root() {
        tracing::warn!("Not running as root; private data partitions will likely fail");
    }

    let content = std::fs::read(&args.packages)
        .with_context(|| format!("Failed to read {}", args.packages.display()))?;
    let mut packages: Vec<PackageDescriptor> =
        serde_json::from_slice(&content).context("Failed to parse package list")?;
    let strategy = args.strategy.unwrap_or(config.backup.strategy);

    let archiver = TarArchiver::new(config.backup.compression, config.backup.compression_level);
    let store = JsonCatalogStore::new(config.catalog_path());
    let mut controller =
        TaskController::open(LocalFs::new(), archiver, SettingsToggles::new(), store, config)
            .await
            .context("Failed to open restore catalog")?;

    // Signals cancel the run; the controller still restores and saves
    let shutdown = ShutdownCoordinator::new();
    let cancel = shutdown.token();
    let signals = tokio::spawn(async move { shutdown.wait_for_signal().await });

    let summary = controller.run(&packages, strategy, cancel.clone()).await;
    cancel.cancel();
    let _ = signals.await;

    // Measured sizes become the known sizes of the next run
    if refresh_sizes(&mut packages, &summary.packages) > 0 {
        write_packages(&args.packages, &packages)
            .with_context(|| format!("Failed to update {}", args.packages.display()))?;
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);

    if !summary.failed.is_empty() || !summary.skipped.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

/// Written through a temp file, then renamed over `path`
fn write_packages(path: &Path, packages: &[PackageDescriptor]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(packages)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
