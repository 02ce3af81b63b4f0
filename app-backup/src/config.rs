//! Configuration management for the backup pipeline.
//!
//! Loads configuration from a TOML file with environment variable overrides
//! (`APP_BACKUP__BACKUP__STRATEGY=versioned` and so on).

use crate::catalog::RetentionStrategy;
use crate::model::PartitionKind;
use crate::primitives::archiver::CompressionType;
use crate::utils::errors::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Placeholder substituted with the user/profile id in partition roots
const USER_PLACEHOLDER: &str = "{user}";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub agent: AgentConfig,
    pub backup: BackupConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Name recorded in run records
    pub device_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Backup save path; every package gets `{root}/{package}/{date}`
    pub root: PathBuf,

    /// User/profile whose partitions are archived
    #[serde(default)]
    pub user_id: u32,

    /// Whether successive runs overwrite or accumulate snapshots
    #[serde(default)]
    pub strategy: RetentionStrategy,

    /// Archive container (tar, zstd)
    #[serde(default)]
    pub compression: CompressionType,

    /// Compression level (1-22 for zstd)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,

    /// Write `icon.png` next to each package's snapshots
    #[serde(default = "default_true")]
    pub write_icons: bool,

    /// Copy the running executable into the backup root before the run
    #[serde(default)]
    pub include_self: bool,
}

/// Partition roots on the device. `{user}` is replaced with the user id and
/// the package name is appended to get the partition directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_user_root")]
    pub user: String,
    #[serde(default = "default_user_de_root")]
    pub user_de: String,
    #[serde(default = "default_data_root")]
    pub data: String,
    #[serde(default = "default_obb_root")]
    pub obb: String,
    #[serde(default = "default_media_root")]
    pub media: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Restore catalog file; defaults to `{backup.root}/restore.json`
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output (stdout, stderr)
    #[serde(default = "default_log_output")]
    pub output: String,
}

// Default values
fn default_compression_level() -> i32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_user_root() -> String {
    "/data/user/{user}".to_string()
}

fn default_user_de_root() -> String {
    "/data/user_de/{user}".to_string()
}

fn default_data_root() -> String {
    "/storage/emulated/{user}/Android/data".to_string()
}

fn default_obb_root() -> String {
    "/storage/emulated/{user}/Android/obb".to_string()
}

fn default_media_root() -> String {
    "/storage/emulated/{user}/Android/media".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_output() -> String {
    "stderr".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            user: default_user_root(),
            user_de: default_user_de_root(),
            data: default_data_root(),
            obb: default_obb_root(),
            media: default_media_root(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            output: default_log_output(),
        }
    }
}

impl PathsConfig {
    /// Root directory holding every package's copy of `kind` for `user_id`.
    /// The binary partition has no shared root; it is resolved per package.
    pub fn root_for(&self, kind: PartitionKind, user_id: u32) -> Option<PathBuf> {
        let template = match kind {
            PartitionKind::Apk => return None,
            PartitionKind::User => &self.user,
            PartitionKind::UserDe => &self.user_de,
            PartitionKind::Data => &self.data,
            PartitionKind::Obb => &self.obb,
            PartitionKind::Media => &self.media,
        };
        Some(PathBuf::from(
            template.replace(USER_PLACEHOLDER, &user_id.to_string()),
        ))
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Layer defaults, an optional TOML file and `APP_BACKUP__*` environment
    /// variables, in that order.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            ::config::Config::builder().add_source(::config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path.to_path_buf()).format(::config::FileFormat::Toml),
            );
        }

        let layered = builder
            .add_source(
                ::config::Environment::with_prefix("APP_BACKUP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(layered.try_deserialize()?)
    }

    /// Create a default configuration
    pub fn default() -> Self {
        Config {
            agent: AgentConfig {
                device_name: hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| "android-device".to_string()),
            },
            backup: BackupConfig {
                root: PathBuf::from("/storage/emulated/0/DataBackup"),
                user_id: 0,
                strategy: RetentionStrategy::default(),
                compression: CompressionType::default(),
                compression_level: default_compression_level(),
                write_icons: true,
                include_self: false,
            },
            paths: PathsConfig::default(),
            catalog: CatalogConfig::default(),
            log: LogConfig::default(),
        }
    }

    /// Location of the restore catalog file
    pub fn catalog_path(&self) -> PathBuf {
        self.catalog
            .path
            .clone()
            .unwrap_or_else(|| self.backup.root.join("restore.json"))
    }
}
