//! In-memory device, archiver, settings and catalog store for executor tests.

use crate::catalog::{store::CatalogStore, Catalog};
use crate::model::PartitionKind;
use crate::primitives::{
    ArchiveRequest, Archiver, DeviceFs, EnvironmentToggles, ProgressFn, SizeMode, Toggle,
};
use crate::transfer::progress::ArchiveProgress;
use crate::utils::errors::{BackupError, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct DeviceState {
    sizes: HashMap<PathBuf, u64>,
    queued_sizes: HashMap<PathBuf, VecDeque<u64>>,
    apks: HashMap<String, PathBuf>,
    size_queries: Vec<PathBuf>,
    written: Vec<PathBuf>,
    copies: Vec<(PathBuf, PathBuf)>,
}

#[derive(Default)]
pub struct FakeDevice {
    state: Mutex<DeviceState>,
    failing_writes: bool,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing directory measuring `size` bytes
    pub fn with_dir(self, path: impl Into<PathBuf>, size: u64) -> Self {
        self.state.lock().unwrap().sizes.insert(path.into(), size);
        self
    }

    pub fn with_apk(self, package: &str, dir: impl Into<PathBuf>, size: u64) -> Self {
        let dir = dir.into();
        self.state
            .lock()
            .unwrap()
            .apks
            .insert(package.to_string(), dir.clone());
        self.with_dir(dir, size)
    }

    /// Successive measurements of `path`; the last one repeats
    pub fn with_sizes(self, path: impl Into<PathBuf>, sizes: Vec<u64>) -> Self {
        self.state
            .lock()
            .unwrap()
            .queued_sizes
            .insert(path.into(), sizes.into());
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.failing_writes = true;
        self
    }

    pub fn size_queries(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().size_queries.clone()
    }

    pub fn written(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn copies(&self) -> Vec<(PathBuf, PathBuf)> {
        self.state.lock().unwrap().copies.clone()
    }
}

impl DeviceFs for FakeDevice {
    async fn path_exists(&self, path: &Path) -> bool {
        let state = self.state.lock().unwrap();
        state.sizes.contains_key(path) || state.queued_sizes.contains_key(path)
    }

    async fn count_size(&self, path: &Path, _mode: SizeMode) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.size_queries.push(path.to_path_buf());
        if let Some(queue) = state.queued_sizes.get_mut(path) {
            return match queue.len() {
                0 => 0,
                1 => queue[0],
                _ => queue.pop_front().unwrap_or_default(),
            };
        }
        state.sizes.get(path).copied().unwrap_or(0)
    }

    async fn apk_dir(&self, package: &str, _user_id: u32) -> Option<PathBuf> {
        self.state.lock().unwrap().apks.get(package).cloned()
    }

    async fn write_file(&self, path: &Path, _bytes: &[u8]) -> Result<()> {
        if self.failing_writes {
            return Err(BackupError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )));
        }
        self.state.lock().unwrap().written.push(path.to_path_buf());
        Ok(())
    }

    async fn copy_file(&self, from: &Path, to: &Path) -> Result<()> {
        if self.failing_writes {
            return Err(BackupError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )));
        }
        self.state
            .lock()
            .unwrap()
            .copies
            .push((from.to_path_buf(), to.to_path_buf()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeArchiver {
    failures: HashSet<(String, PartitionKind)>,
    progress: Vec<ArchiveProgress>,
    cancel_after: Option<(usize, CancellationToken)>,
    calls: Mutex<Vec<(String, PartitionKind, PathBuf)>>,
}

impl FakeArchiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payloads reported on every call
    pub fn with_progress(mut self, progress: Vec<ArchiveProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn failing(mut self, package: &str, kind: PartitionKind) -> Self {
        self.failures.insert((package.to_string(), kind));
        self
    }

    /// Cancel `token` once `calls` archives have been attempted
    pub fn cancel_after(mut self, calls: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((calls, token));
        self
    }

    /// `(package, kind, dest_dir)` per call
    pub fn calls(&self) -> Vec<(String, PartitionKind, PathBuf)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn destinations(&self) -> Vec<PathBuf> {
        self.calls().into_iter().map(|(_, _, dest)| dest).collect()
    }
}

impl Archiver for FakeArchiver {
    async fn compress(&self, request: &ArchiveRequest<'_>, on_progress: ProgressFn<'_>) -> Result<()> {
        let attempted = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((
                request.package.to_string(),
                request.kind,
                request.dest_dir.to_path_buf(),
            ));
            calls.len()
        };

        for progress in &self.progress {
            on_progress(progress.clone());
        }

        if let Some((after, token)) = &self.cancel_after {
            if attempted >= *after {
                token.cancel();
            }
        }

        if self
            .failures
            .contains(&(request.package.to_string(), request.kind))
        {
            return Err(BackupError::Archive(format!(
                "{} {} failed",
                request.package, request.kind
            )));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeToggles {
    values: Mutex<HashMap<Toggle, String>>,
    writes: Mutex<Vec<(Toggle, Option<String>)>>,
    failing_restore: bool,
}

impl FakeToggles {
    pub fn new(input_method: Option<&str>, accessibility: Option<&str>) -> Self {
        let toggles = Self::default();
        {
            let mut values = toggles.values.lock().unwrap();
            if let Some(v) = input_method {
                values.insert(Toggle::InputMethod, v.to_string());
            }
            if let Some(v) = accessibility {
                values.insert(Toggle::Accessibility, v.to_string());
            }
        }
        toggles
    }

    /// Writing a value back fails; clearing still works
    pub fn failing_restore(mut self) -> Self {
        self.failing_restore = true;
        self
    }

    pub fn value(&self, toggle: Toggle) -> Option<String> {
        self.values.lock().unwrap().get(&toggle).cloned()
    }

    pub fn writes(&self) -> Vec<(Toggle, Option<String>)> {
        self.writes.lock().unwrap().clone()
    }
}

impl EnvironmentToggles for FakeToggles {
    async fn get(&self, toggle: Toggle) -> Result<Option<String>> {
        Ok(self.value(toggle))
    }

    async fn set(&self, toggle: Toggle, value: Option<&str>) -> Result<()> {
        if self.failing_restore && value.is_some() {
            return Err(BackupError::Command {
                command: "settings put".to_string(),
                reason: "denied".to_string(),
            });
        }
        self.writes
            .lock()
            .unwrap()
            .push((toggle, value.map(str::to_string)));
        let mut values = self.values.lock().unwrap();
        match value {
            Some(v) => values.insert(toggle, v.to_string()),
            None => values.remove(&toggle),
        };
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    catalog: Mutex<Catalog>,
    loads: AtomicUsize,
    saves: AtomicUsize,
    failing_load: bool,
    failing_save: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(catalog: Catalog) -> Self {
        Self {
            catalog: Mutex::new(catalog),
            ..Self::default()
        }
    }

    pub fn failing_load(mut self) -> Self {
        self.failing_load = true;
        self
    }

    pub fn failing_save(mut self) -> Self {
        self.failing_save = true;
        self
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Last catalog handed to `save`
    pub fn saved(&self) -> Catalog {
        self.catalog.lock().unwrap().clone()
    }
}

impl CatalogStore for MemoryStore {
    async fn load(&self) -> Result<Catalog> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.failing_load {
            return Err(BackupError::CatalogLoad {
                path: "memory".to_string(),
                reason: "unreadable".to_string(),
            });
        }
        Ok(self.catalog.lock().unwrap().clone())
    }

    async fn save(&self, catalog: &Catalog) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.failing_save {
            return Err(BackupError::CatalogSave {
                path: "memory".to_string(),
                reason: "disk full".to_string(),
            });
        }
        *self.catalog.lock().unwrap() = catalog.clone();
        Ok(())
    }
}
