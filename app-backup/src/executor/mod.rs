//! Backup task orchestration.
//!
//! [`TaskController`] runs packages one after another through a
//! [`package::PackageJob`], keeps the restore catalog for the duration of the
//! run and persists it once at the end. Device services are disabled for the
//! run by [`environment::EnvironmentGuard`] and restored on every exit path.

pub mod environment;
pub mod item;
pub mod package;
pub mod progress;

#[cfg(test)]
pub(crate) mod testutil;

use crate::catalog::store::CatalogStore;
use crate::catalog::{Catalog, RetentionStrategy, RunRecord};
use crate::config::Config;
use crate::model::{PackageDescriptor, Task, TaskSummary};
use crate::primitives::{Archiver, DeviceFs, EnvironmentToggles, SizeMode};
use crate::utils::errors::Result;
use chrono::{DateTime, Utc};
use environment::EnvironmentGuard;
use package::PackageJob;
use progress::{ProgressEvent, ProgressReporter};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Name of the executable copy written into the backup root
pub const SELF_BACKUP_NAME: &str = "app-backup";

/// Kind recorded on run records written by this pipeline
const RUN_KIND: &str = "app";

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Top-level orchestrator of a backup task.
pub struct TaskController<F, A, T, S> {
    fs: F,
    archiver: A,
    toggles: T,
    store: S,
    config: Config,
    catalog: Catalog,
    clock: Clock,
    listener: Option<mpsc::UnboundedSender<ProgressEvent>>,
    last_task: Option<Task>,
}

impl<F, A, T, S> TaskController<F, A, T, S>
where
    F: DeviceFs,
    A: Archiver,
    T: EnvironmentToggles,
    S: CatalogStore,
{
    /// Load the restore catalog and get ready to run.
    ///
    /// An unreadable catalog is the one failure that stops a task before it
    /// starts.
    pub async fn open(fs: F, archiver: A, toggles: T, store: S, config: Config) -> Result<Self> {
        let catalog = store.load().await?;
        info!("Restore catalog loaded ({} packages)", catalog.len());

        Ok(Self {
            fs,
            archiver,
            toggles,
            store,
            config,
            catalog,
            clock: Arc::new(Utc::now),
            listener: None,
            last_task: None,
        })
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Receive every progress event of subsequent runs
    pub fn with_listener(mut self, listener: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    pub fn archiver(&self) -> &A {
        &self.archiver
    }

    pub fn toggles(&self) -> &T {
        &self.toggles
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The task of the most recent run
    pub fn last_task(&self) -> Option<&Task> {
        self.last_task.as_ref()
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Back up `packages` in order.
    ///
    /// Package failures are recorded and never stop the task. Cancellation is
    /// honoured between packages and between items; the environment is
    /// restored and the catalog saved in every case.
    ///
    /// The returned future must be driven to completion. Dropping it midway
    /// leaves the input method and accessibility services disabled and the
    /// catalog unsaved; stop a run through `cancel` instead.
    pub async fn run(
        &mut self,
        packages: &[PackageDescriptor],
        strategy: RetentionStrategy,
        cancel: CancellationToken,
    ) -> TaskSummary {
        let root = self.config.backup.root.clone();
        let mut task = Task::new();
        let (reporter, progress) = progress::spawn(packages.len(), self.listener.clone());

        let started_at = self.now();
        let start_size = self.fs.count_size(&root, SizeMode::Tree).await;
        task.start(started_at, start_size);
        info!(
            "Starting backup task {} ({} packages, {:?} strategy)",
            task.id,
            packages.len(),
            strategy
        );

        reporter.send(ProgressEvent::TaskStarted {
            task_id: task.id,
            total: packages.len(),
            selected_apk: packages.iter().filter(|p| p.select_apk).count(),
            selected_data: packages.iter().filter(|p| p.select_data).count(),
            user_id: self.config.backup.user_id,
        });

        let guard = EnvironmentGuard::new(&self.toggles);
        let captured = guard.acquire().await;

        if self.config.backup.include_self {
            backup_self(&self.fs, &root).await;
        }

        let skipped = {
            let job = PackageJob::new(
                &self.fs,
                &self.archiver,
                &self.config.paths,
                &root,
                &reporter,
                &cancel,
            )
            .write_icons(self.config.backup.write_icons);

            let mut skipped = Vec::new();
            for (index, pkg) in packages.iter().enumerate() {
                if cancel.is_cancelled() {
                    skipped = packages[index..]
                        .iter()
                        .map(|p| p.package_name.clone())
                        .collect();
                    warn!("Backup cancelled, skipping {} packages", skipped.len());
                    break;
                }

                reporter.send(ProgressEvent::PackageStarted {
                    index,
                    package: pkg.package_name.clone(),
                });

                let now = (self.clock)();
                let result = job
                    .run(pkg, strategy.date_key(now), now, &mut self.catalog)
                    .await;

                if result.succeeded {
                    info!("Package {} backed up", pkg.package_name);
                } else {
                    warn!("Package {} failed", pkg.package_name);
                }

                // An interrupted package was not completed
                if !result.interrupted {
                    reporter.send(ProgressEvent::PackageFinished {
                        index,
                        package: pkg.package_name.clone(),
                        succeeded: result.succeeded,
                    });
                }
                task.record(result);
            }
            skipped
        };

        let environment_errors: Vec<String> = guard
            .release(captured)
            .await
            .iter()
            .map(ToString::to_string)
            .collect();

        let cancelled = !skipped.is_empty() || task.results.iter().any(|r| r.interrupted);
        let finished_at = self.now();
        let end_size = self.fs.count_size(&root, SizeMode::Tree).await;
        task.finish(finished_at, end_size, cancelled);

        self.catalog.record_run(RunRecord {
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            task_id: task.id,
            started_at,
            finished_at,
            start_size,
            end_size,
            kind: RUN_KIND.to_string(),
            user_id: self.config.backup.user_id,
            device: self.config.agent.device_name.clone(),
        });
        let persist_error = self.persist().await;

        let succeeded: Vec<String> = task.succeeded().map(|r| r.package_name.clone()).collect();
        let failed: Vec<String> = task.failed().map(|r| r.package_name.clone()).collect();
        let snapshot = finish_progress(
            reporter,
            progress,
            ProgressEvent::TaskFinished {
                succeeded: succeeded.len(),
                failed: failed.len(),
                cancelled,
            },
        )
        .await;

        let summary = TaskSummary {
            task_id: task.id,
            state: task.state,
            succeeded,
            failed,
            skipped,
            started_at,
            finished_at,
            start_size,
            end_size,
            progress: snapshot,
            packages: task.results.clone(),
            environment_errors,
            persist_error,
        };
        info!("Backup task {} finished: {}", task.id, summary.describe());

        self.last_task = Some(task);
        summary
    }

    async fn persist(&self) -> Option<String> {
        match self.store.save(&self.catalog).await {
            Ok(()) => None,
            Err(e) => {
                error!("Failed to save restore catalog: {}", e);
                Some(e.to_string())
            }
        }
    }
}

async fn finish_progress(
    reporter: ProgressReporter,
    progress: progress::ProgressHandle,
    last: ProgressEvent,
) -> progress::ProgressSnapshot {
    reporter.send(last);
    drop(reporter);
    progress.finish().await
}

/// Copy the running executable next to the backups. Best-effort.
async fn backup_self<F: DeviceFs>(fs: &F, root: &Path) {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            warn!("Cannot locate own executable: {}", e);
            return;
        }
    };
    let dest = root.join(SELF_BACKUP_NAME);
    match fs.copy_file(&exe, &dest).await {
        Ok(()) => info!("Copied {} to {}", exe.display(), dest.display()),
        Err(e) => warn!("Failed to copy {} to {}: {}", exe.display(), dest.display(), e),
    }
}
