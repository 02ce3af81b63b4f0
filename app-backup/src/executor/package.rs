//! Backup of one package: partition discovery, item execution, reduction and
//! the restore catalog merge.

use super::item::{ItemOutcome, ItemProcessor};
use super::progress::{ProgressEvent, ProgressReporter};
use crate::catalog::{Catalog, DateKey, EntryOrigin, Snapshot};
use crate::config::PathsConfig;
use crate::model::{Item, ItemState, PackageDescriptor, PackageResult, PartitionKind};
use crate::primitives::{Archiver, DeviceFs};
use crate::transfer::progress::format_bytes;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// File name of the icon stored next to a package's snapshots
pub const ICON_FILE: &str = "icon.png";

/// An item together with where its data comes from.
#[derive(Debug, Clone)]
pub struct PlannedItem {
    pub item: Item,
    /// APK directory or partition root; `None` when the APK could not be located
    pub source: Option<PathBuf>,
}

pub struct PackageJob<'a, F, A> {
    fs: &'a F,
    archiver: &'a A,
    paths: &'a PathsConfig,
    backup_root: &'a Path,
    write_icons: bool,
    reporter: &'a ProgressReporter,
    cancel: &'a CancellationToken,
}

impl<'a, F: DeviceFs, A: Archiver> PackageJob<'a, F, A> {
    pub fn new(
        fs: &'a F,
        archiver: &'a A,
        paths: &'a PathsConfig,
        backup_root: &'a Path,
        reporter: &'a ProgressReporter,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            fs,
            archiver,
            paths,
            backup_root,
            write_icons: false,
            reporter,
            cancel,
        }
    }

    pub fn write_icons(mut self, enabled: bool) -> Self {
        self.write_icons = enabled;
        self
    }

    /// `{root}/{package}/{date}`
    pub fn snapshot_dir(&self, package: &str, date_key: &DateKey) -> PathBuf {
        self.backup_root.join(package).join(date_key.as_str())
    }

    /// Items for every selected partition that is present, in processing order.
    ///
    /// The binary partition is always planned when selected; the data
    /// partitions only when `{root}/{package}` exists.
    pub async fn discover(&self, pkg: &PackageDescriptor) -> Vec<PlannedItem> {
        let mut planned = Vec::new();

        for kind in PartitionKind::ALL {
            if !pkg.selects(kind) {
                continue;
            }

            let source = if kind.is_binary() {
                self.fs.apk_dir(&pkg.package_name, pkg.user_id).await
            } else {
                let Some(root) = self.paths.root_for(kind, pkg.user_id) else {
                    continue;
                };
                if !self.fs.path_exists(&root.join(&pkg.package_name)).await {
                    continue;
                }
                Some(root)
            };

            planned.push(PlannedItem {
                item: Item::new(kind, pkg.sizes.get(kind)),
                source,
            });
        }

        planned.sort_by_key(|p| p.item.weight());
        planned
    }

    /// Run every planned item of `pkg` and fold the outcomes into a result.
    ///
    /// On success the result is merged into `catalog` under `date_key`; a
    /// failed package leaves the catalog untouched.
    pub async fn run(
        &self,
        pkg: &PackageDescriptor,
        date_key: DateKey,
        now: DateTime<Utc>,
        catalog: &mut Catalog,
    ) -> PackageResult {
        let name = pkg.package_name.as_str();
        let planned = self.discover(pkg).await;
        let dest_dir = self.snapshot_dir(name, &date_key);
        info!(
            "Backing up {} ({} items) into {}",
            pkg.display_name(),
            planned.len(),
            dest_dir.display()
        );

        let processor = ItemProcessor::new(self.fs, self.archiver, self.reporter);
        let mut sizes = pkg.sizes;
        let mut items = Vec::with_capacity(planned.len());
        let mut interrupted = false;

        for PlannedItem { mut item, source } in planned {
            if interrupted || self.cancel.is_cancelled() {
                interrupted = true;
                items.push(item);
                continue;
            }

            item.state = ItemState::Processing;
            self.reporter.send(ProgressEvent::ItemStarted {
                package: name.to_string(),
                kind: item.kind,
            });

            let outcome = match &source {
                Some(source) => {
                    processor
                        .run(name, pkg.user_id, item.kind, item.size, source, &dest_dir)
                        .await
                }
                None => {
                    warn!("No APK directory found for {}", name);
                    item.progress_text = Some("APK directory not found".to_string());
                    ItemOutcome::failed()
                }
            };

            // Later items still run after a failure
            if outcome.succeeded {
                item.state = ItemState::Done;
                if let Some(size) = outcome.measured_size {
                    item.size = size;
                    sizes.set(item.kind, size);
                }
                item.progress_text = Some(format_bytes(item.size));
            } else {
                item.state = ItemState::Error;
                item.progress_text.get_or_insert_with(|| "archiving failed".to_string());
            }

            self.reporter.send(ProgressEvent::ItemFinished {
                package: name.to_string(),
                kind: item.kind,
                state: item.state,
                size: item.size,
            });
            items.push(item);
        }

        if self.write_icons {
            self.write_icon(pkg).await;
        }

        let succeeded = !interrupted
            && items
                .iter()
                .filter(|item| item.state != ItemState::Pending)
                .all(Item::is_done);

        let mut result = PackageResult {
            package_name: name.to_string(),
            user_id: pkg.user_id,
            items,
            sizes,
            succeeded,
            date_key,
            restore_ref: None,
            merge_error: None,
            interrupted,
        };

        if result.succeeded && !result.items.is_empty() {
            self.merge(pkg, &mut result, now, catalog);
        }

        result
    }

    fn merge(
        &self,
        pkg: &PackageDescriptor,
        result: &mut PackageResult,
        now: DateTime<Utc>,
        catalog: &mut Catalog,
    ) {
        let snapshot = Snapshot {
            date: result.date_key.clone(),
            sizes: result.sizes,
            version_name: pkg.version_name.clone(),
            version_code: pkg.version_code,
            has_apk: result.item(PartitionKind::Apk).is_some_and(Item::is_done),
            has_data: result
                .items
                .iter()
                .any(|item| !item.kind.is_binary() && item.is_done()),
            created_at: now,
        };
        let origin = EntryOrigin {
            package_name: &pkg.package_name,
            label: &pkg.label,
            user_id: pkg.user_id,
            first_install_time: pkg.first_install_time,
        };

        match catalog.merge(&origin, snapshot) {
            Ok(outcome) => result.restore_ref = Some(outcome.into_restore_ref()),
            Err(e) => {
                warn!("Skipping catalog merge for {}: {}", pkg.package_name, e);
                result.merge_error = Some(e.to_string());
            }
        }
    }

    /// Best-effort; a missing or unwritable icon never fails the package.
    async fn write_icon(&self, pkg: &PackageDescriptor) {
        let Some(png) = &pkg.icon_png else {
            return;
        };
        let path = self.backup_root.join(&pkg.package_name).join(ICON_FILE);
        if let Err(e) = self.fs.write_file(&path, png).await {
            warn!("Failed to write icon for {}: {}", pkg.package_name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::progress;
    use crate::executor::testutil::{FakeArchiver, FakeDevice};

    const ROOT: &str = "/backup";

    fn device() -> FakeDevice {
        FakeDevice::new()
            .with_apk("com.a", "/data/app/com.a-1", 300)
            .with_dir("/data/user/0/com.a", 1000)
            .with_dir("/data/user_de/0/com.a", 20)
            .with_dir("/storage/emulated/0/Android/obb/com.a", 5000)
    }

    async fn run_job(
        fs: &FakeDevice,
        archiver: &FakeArchiver,
        pkg: &PackageDescriptor,
        catalog: &mut Catalog,
        cancel: &CancellationToken,
    ) -> PackageResult {
        let paths = PathsConfig::default();
        let (reporter, _handle) = progress::spawn(1, None);
        PackageJob::new(fs, archiver, &paths, Path::new(ROOT), &reporter, cancel)
            .write_icons(true)
            .run(pkg, DateKey::cover(), Utc::now(), catalog)
            .await
    }

    #[tokio::test]
    async fn test_discovery_only_present_partitions_in_order() {
        let fs = device();
        let archiver = FakeArchiver::new();
        let paths = PathsConfig::default();
        let cancel = CancellationToken::new();
        let (reporter, _handle) = progress::spawn(1, None);
        let job = PackageJob::new(&fs, &archiver, &paths, Path::new(ROOT), &reporter, &cancel);

        let pkg = PackageDescriptor::new("com.a", 0).with_apk().with_data();
        let kinds: Vec<_> = job.discover(&pkg).await.iter().map(|p| p.item.kind).collect();
        assert_eq!(
            kinds,
            vec![
                PartitionKind::Apk,
                PartitionKind::User,
                PartitionKind::UserDe,
                PartitionKind::Obb
            ]
        );

        let data_only = PackageDescriptor::new("com.a", 0).with_data();
        assert_eq!(job.discover(&data_only).await.len(), 3);
    }

    #[tokio::test]
    async fn test_all_items_succeed() {
        let fs = device();
        let archiver = FakeArchiver::new();
        let mut catalog = Catalog::new();
        let mut pkg = PackageDescriptor::new("com.a", 0).with_apk().with_data();
        pkg.sizes.media = 77;

        let result = run_job(&fs, &archiver, &pkg, &mut catalog, &CancellationToken::new()).await;

        assert!(result.succeeded);
        assert_eq!(result.items.len(), 4);
        assert!(result.items.iter().all(Item::is_done));
        assert_eq!(result.sizes.apk, 300);
        assert_eq!(result.sizes.user, 1000);
        assert_eq!(result.sizes.user_de, 20);
        assert_eq!(result.sizes.obb, 5000);
        // Not present, keeps the prior value
        assert_eq!(result.sizes.media, 77);

        let entry = catalog.entry("com.a").expect("merged");
        assert_eq!(entry.snapshots.len(), 1);
        assert!(entry.snapshots[0].has_apk);
        assert!(entry.snapshots[0].has_data);
        assert_eq!(result.restore_ref.as_ref().map(|r| r.snapshot_index), Some(0));
        assert_eq!(
            archiver.destinations(),
            vec![PathBuf::from("/backup/com.a/Cover"); 4]
        );
    }

    #[tokio::test]
    async fn test_one_failure_keeps_siblings() {
        let fs = device();
        let archiver = FakeArchiver::new().failing("com.a", PartitionKind::User);
        let mut catalog = Catalog::new();
        let mut pkg = PackageDescriptor::new("com.a", 0).with_apk().with_data();
        pkg.sizes.user = 11;

        let result = run_job(&fs, &archiver, &pkg, &mut catalog, &CancellationToken::new()).await;

        assert!(!result.succeeded);
        let states: Vec<_> = result.items.iter().map(|i| i.state).collect();
        assert_eq!(
            states,
            vec![ItemState::Done, ItemState::Error, ItemState::Done, ItemState::Done]
        );
        // Failed partition keeps its prior size, siblings are measured
        assert_eq!(result.sizes.user, 11);
        assert_eq!(result.sizes.user_de, 20);
        assert_eq!(result.sizes.obb, 5000);
        assert!(result.restore_ref.is_none());
        assert!(catalog.is_empty());
    }

    #[tokio::test]
    async fn test_failed_apk_still_runs_data() {
        let fs = device();
        let archiver = FakeArchiver::new().failing("com.a", PartitionKind::Apk);
        let mut catalog = Catalog::new();
        let pkg = PackageDescriptor::new("com.a", 0).with_apk().with_data();

        let result = run_job(&fs, &archiver, &pkg, &mut catalog, &CancellationToken::new()).await;

        assert!(!result.succeeded);
        assert_eq!(archiver.calls().len(), 4);
        assert_eq!(result.item(PartitionKind::User).unwrap().state, ItemState::Done);
    }

    #[tokio::test]
    async fn test_unresolvable_apk_is_an_item_failure() {
        let fs = FakeDevice::new();
        let archiver = FakeArchiver::new();
        let mut catalog = Catalog::new();
        let pkg = PackageDescriptor::new("com.gone", 0).with_apk();

        let result = run_job(&fs, &archiver, &pkg, &mut catalog, &CancellationToken::new()).await;

        assert!(!result.succeeded);
        assert_eq!(result.items[0].state, ItemState::Error);
        assert!(archiver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_nothing_present_is_vacuous_success() {
        let fs = FakeDevice::new();
        let archiver = FakeArchiver::new();
        let mut catalog = Catalog::new();
        let pkg = PackageDescriptor::new("com.empty", 0).with_data();

        let result = run_job(&fs, &archiver, &pkg, &mut catalog, &CancellationToken::new()).await;

        assert!(result.succeeded);
        assert!(result.items.is_empty());
        assert!(result.restore_ref.is_none());
        assert!(catalog.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_between_items_interrupts_package() {
        let fs = device();
        let cancel = CancellationToken::new();
        let archiver = FakeArchiver::new().cancel_after(1, cancel.clone());
        let mut catalog = Catalog::new();
        let pkg = PackageDescriptor::new("com.a", 0).with_apk().with_data();

        let result = run_job(&fs, &archiver, &pkg, &mut catalog, &cancel).await;

        assert!(!result.succeeded);
        assert!(result.interrupted);
        assert_eq!(result.items[0].state, ItemState::Done);
        assert!(result.items[1..].iter().all(|i| i.state == ItemState::Pending));
        assert_eq!(archiver.calls().len(), 1);
        assert!(catalog.is_empty());
    }

    #[tokio::test]
    async fn test_icon_written_and_failure_ignored() {
        let fs = device();
        let archiver = FakeArchiver::new();
        let mut catalog = Catalog::new();
        let mut pkg = PackageDescriptor::new("com.a", 0).with_apk();
        pkg.icon_png = Some(vec![0x89, b'P', b'N', b'G']);

        let result = run_job(&fs, &archiver, &pkg, &mut catalog, &CancellationToken::new()).await;
        assert!(result.succeeded);
        assert_eq!(fs.written(), vec![PathBuf::from("/backup/com.a/icon.png")]);

        let broken = device().failing_writes();
        let result = run_job(&broken, &archiver, &pkg, &mut catalog, &CancellationToken::new()).await;
        assert!(result.succeeded);
    }

    #[tokio::test]
    async fn test_corrupt_entry_keeps_sizes_and_success() {
        use crate::catalog::RestoreEntry;

        let fs = device();
        let archiver = FakeArchiver::new();
        let mut catalog = Catalog::new();
        catalog.insert_entry(
            "com.a",
            RestoreEntry::new(&EntryOrigin {
                package_name: "com.other",
                label: "",
                user_id: 0,
                first_install_time: 0,
            }),
        );
        let pkg = PackageDescriptor::new("com.a", 0).with_apk();

        let result = run_job(&fs, &archiver, &pkg, &mut catalog, &CancellationToken::new()).await;

        assert!(result.succeeded);
        assert_eq!(result.sizes.apk, 300);
        assert!(result.restore_ref.is_none());
        assert!(result.merge_error.is_some());
    }
}
