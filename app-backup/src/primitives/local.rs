//! Filesystem primitives backed by the local (device) filesystem.

use super::{run_command, DeviceFs, SizeMode};
use crate::fs::walker::{calculate_total_size, WalkOptions};
use crate::utils::errors::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Prefix of every line printed by `pm path`
const PM_PATH_PREFIX: &str = "package:";

#[derive(Debug, Clone, Default)]
pub struct LocalFs {
    walk_options: WalkOptions,
}

impl LocalFs {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Directory of the first APK listed by `pm path`
fn parse_pm_path(output: &str) -> Option<PathBuf> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix(PM_PATH_PREFIX))
        .map(PathBuf::from)
        .find_map(|apk| apk.parent().map(Path::to_path_buf))
}

impl DeviceFs for LocalFs {
    async fn path_exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn count_size(&self, path: &Path, mode: SizeMode) -> u64 {
        match mode {
            SizeMode::Single => tokio::fs::symlink_metadata(path)
                .await
                .map(|m| m.len())
                .unwrap_or(0),
            SizeMode::Tree => {
                let root = path.to_path_buf();
                let options = self.walk_options.clone();
                // Directory walks are blocking
                match tokio::task::spawn_blocking(move || calculate_total_size(&root, &options)).await {
                    Ok(size) => {
                        if size.skipped > 0 {
                            debug!("Skipped {} unreadable entries under {}", size.skipped, path.display());
                        }
                        size.bytes
                    }
                    Err(e) => {
                        warn!("Size walk of {} failed: {}", path.display(), e);
                        0
                    }
                }
            }
        }
    }

    async fn apk_dir(&self, package: &str, user_id: u32) -> Option<PathBuf> {
        let user = user_id.to_string();
        match run_command("pm", ["path", "--user", user.as_str(), package]).await {
            Ok(output) => parse_pm_path(&output),
            Err(e) => {
                warn!("Could not resolve APK path of {}: {}", package, e);
                None
            }
        }
    }

    async fn write_file(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    async fn copy_file(&self, from: &Path, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(from, to).await?;
        Ok(())
    }
}
