//! Logging configuration using tracing.

use crate::config::LogConfig;
use crate::utils::errors::{BackupError, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Build the level filter: `RUST_LOG` wins, then `level`, then `info`.
fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize logging with the configured level and output.
///
/// `output = "stdout"` writes to standard output; anything else writes to
/// standard error so the summary printed by the binary stays machine-readable.
pub fn init(log: &LogConfig, level_override: Option<&str>) -> Result<()> {
    let level = level_override.unwrap_or(&log.level);

    let layer = if log.output == "stdout" {
        fmt::layer().with_target(false).boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(build_filter(level))
        .with(layer)
        .try_init()
        .map_err(|e| BackupError::Config(format!("logger already initialized: {e}")))
}
