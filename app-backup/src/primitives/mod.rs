//! Device primitives the pipeline drives but does not implement itself.
//!
//! The executor only talks to these traits; `local`, `archiver` and
//! `settings` provide the on-device implementations.

pub mod archiver;
pub mod local;
pub mod settings;

use crate::model::PartitionKind;
use crate::transfer::progress::ArchiveProgress;
use crate::utils::errors::{BackupError, Result};
use std::ffi::OsStr;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::process::Command;

pub use archiver::{CompressionType, TarArchiver};
pub use local::LocalFs;
pub use settings::SettingsToggles;

/// How `count_size` measures a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeMode {
    /// Sum of every regular file below the path
    Tree,
    /// Length of the path itself
    Single,
}

/// Filesystem queries against the device.
pub trait DeviceFs: Send + Sync {
    fn path_exists(&self, path: &Path) -> impl Future<Output = bool> + Send;

    /// Missing paths measure 0
    fn count_size(&self, path: &Path, mode: SizeMode) -> impl Future<Output = u64> + Send;

    /// Directory holding the installed APKs of `package` for `user_id`
    fn apk_dir(&self, package: &str, user_id: u32) -> impl Future<Output = Option<PathBuf>> + Send;

    fn write_file(&self, path: &Path, bytes: &[u8]) -> impl Future<Output = Result<()>> + Send;

    fn copy_file(&self, from: &Path, to: &Path) -> impl Future<Output = Result<()>> + Send;
}

/// One archiving call.
#[derive(Debug, Clone)]
pub struct ArchiveRequest<'a> {
    pub kind: PartitionKind,
    pub package: &'a str,
    pub user_id: u32,
    /// APK directory for the binary, otherwise the partition root holding `package`
    pub source: &'a Path,
    /// Snapshot directory the archive is written into
    pub dest_dir: &'a Path,
    /// Size known from the previous run, used for percentages
    pub known_size: u64,
}

impl ArchiveRequest<'_> {
    /// Directory whose contents end up in the archive
    pub fn source_dir(&self) -> PathBuf {
        if self.kind.is_binary() {
            self.source.to_path_buf()
        } else {
            self.source.join(self.package)
        }
    }
}

/// Progress sink handed to the archiver for the duration of one call
pub type ProgressFn<'a> = &'a (dyn Fn(ArchiveProgress) + Send + Sync);

/// Compresses one partition of one package into the snapshot directory.
pub trait Archiver: Send + Sync {
    fn compress(
        &self,
        request: &ArchiveRequest<'_>,
        on_progress: ProgressFn<'_>,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// System settings captured and disabled for the duration of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Toggle {
    InputMethod,
    Accessibility,
}

impl Toggle {
    pub const ALL: [Toggle; 2] = [Toggle::InputMethod, Toggle::Accessibility];
}

pub trait EnvironmentToggles: Send + Sync {
    /// `None` when the setting is unset
    fn get(&self, toggle: Toggle) -> impl Future<Output = Result<Option<String>>> + Send;

    /// `None` clears the setting
    fn set(&self, toggle: Toggle, value: Option<&str>) -> impl Future<Output = Result<()>> + Send;
}

/// Run a device command and return its trimmed standard output.
pub(crate) async fn run_command<I, S>(program: &str, args: I) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);
    let rendered = format!("{:?}", command.as_std());

    let output = command.output().await.map_err(|e| BackupError::Command {
        command: rendered.clone(),
        reason: e.to_string(),
    })?;

    if !output.status.success() {
        return Err(BackupError::Command {
            command: rendered,
            reason: format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
