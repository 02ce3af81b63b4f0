//! Custom error types for the backup pipeline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to load restore catalog from {path}: {reason}")]
    CatalogLoad { path: String, reason: String },

    #[error("Failed to save restore catalog to {path}: {reason}")]
    CatalogSave { path: String, reason: String },

    #[error("Restore catalog entry for {package} is corrupt: {reason}")]
    CatalogCorrupt { package: String, reason: String },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Environment toggle error: {0}")]
    Environment(String),

    #[error("Command `{command}` failed: {reason}")]
    Command { command: String, reason: String },
}

impl From<::config::ConfigError> for BackupError {
    fn from(e: ::config::ConfigError) -> Self {
        BackupError::Config(e.to_string())
    }
}

impl From<toml::de::Error> for BackupError {
    fn from(e: toml::de::Error) -> Self {
        BackupError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
