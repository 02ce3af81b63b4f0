//! Persistence of the restore catalog.

use super::Catalog;
use crate::utils::errors::{BackupError, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Loads the catalog once at task start and saves it once at task end.
pub trait CatalogStore: Send + Sync {
    fn load(&self) -> impl Future<Output = Result<Catalog>> + Send;

    fn save(&self, catalog: &Catalog) -> impl Future<Output = Result<()>> + Send;
}

/// Catalog stored as one JSON document.
#[derive(Debug, Clone)]
pub struct JsonCatalogStore {
    path: PathBuf,
}

impl JsonCatalogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_error(&self, reason: impl ToString) -> BackupError {
        BackupError::CatalogLoad {
            path: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    fn save_error(&self, reason: impl ToString) -> BackupError {
        BackupError::CatalogSave {
            path: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

impl CatalogStore for JsonCatalogStore {
    /// A missing file is an empty catalog.
    async fn load(&self) -> Result<Catalog> {
        let exists = tokio::fs::try_exists(&self.path)
            .await
            .map_err(|e| self.load_error(e))?;
        if !exists {
            info!("No restore catalog at {}, starting empty", self.path.display());
            return Ok(Catalog::new());
        }

        let content = tokio::fs::read(&self.path)
            .await
            .map_err(|e| self.load_error(e))?;
        let catalog: Catalog = serde_json::from_slice(&content).map_err(|e| self.load_error(e))?;

        info!(
            "Loaded restore catalog: {} packages, {} runs",
            catalog.len(),
            catalog.runs().len()
        );
        Ok(catalog)
    }

    /// Written to a sibling temp file first, then renamed over the target.
    async fn save(&self, catalog: &Catalog) -> Result<()> {
        let json = serde_json::to_vec_pretty(catalog).map_err(|e| self.save_error(e))?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.save_error(e))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| self.save_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.save_error(e))?;

        debug!("Saved restore catalog ({} bytes) to {}", json.len(), self.path.display());
        Ok(())
    }
}
