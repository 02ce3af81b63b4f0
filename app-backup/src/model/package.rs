//! Package-level input and outcome.

use super::partition::{Item, PartitionKind, PartitionSizes};
use crate::catalog::{DateKey, RestoreRef};
use serde::{Deserialize, Serialize};

/// A package selected for backup, as handed over by the selection layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageDescriptor {
    pub package_name: String,

    /// Display label
    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub user_id: u32,

    /// Archive the installed binary
    #[serde(default)]
    pub select_apk: bool,

    /// Archive the private and external data partitions
    #[serde(default)]
    pub select_data: bool,

    /// Sizes known from the previous run
    #[serde(default)]
    pub sizes: PartitionSizes,

    #[serde(default)]
    pub version_name: String,

    #[serde(default)]
    pub version_code: i64,

    /// Milliseconds since the Unix epoch
    #[serde(default)]
    pub first_install_time: i64,

    /// PNG-encoded launcher icon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_png: Option<Vec<u8>>,
}

impl PackageDescriptor {
    pub fn new(package_name: impl Into<String>, user_id: u32) -> Self {
        Self {
            package_name: package_name.into(),
            label: String::new(),
            user_id,
            select_apk: false,
            select_data: false,
            sizes: PartitionSizes::default(),
            version_name: String::new(),
            version_code: 0,
            first_install_time: 0,
            icon_png: None,
        }
    }

    pub fn with_apk(mut self) -> Self {
        self.select_apk = true;
        self
    }

    pub fn with_data(mut self) -> Self {
        self.select_data = true;
        self
    }

    /// Whether the descriptor asks for `kind` at all
    pub fn selects(&self, kind: PartitionKind) -> bool {
        if kind.is_binary() {
            self.select_apk
        } else {
            self.select_data
        }
    }

    pub fn display_name(&self) -> &str {
        if self.label.is_empty() {
            &self.package_name
        } else {
            &self.label
        }
    }
}

/// Outcome of one package within a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageResult {
    pub package_name: String,
    pub user_id: u32,
    pub items: Vec<Item>,
    /// Final sizes; partitions that failed or were not attempted keep their prior value
    pub sizes: PartitionSizes,
    /// True iff every attempted item ended `Done`
    pub succeeded: bool,
    pub date_key: DateKey,
    /// Snapshot this result was merged into, if any
    pub restore_ref: Option<RestoreRef>,
    /// Set when the catalog entry could not take the snapshot
    pub merge_error: Option<String>,
    /// Set when cancellation stopped the package between items
    #[serde(default)]
    pub interrupted: bool,
}

impl PackageResult {
    pub fn item(&self, kind: PartitionKind) -> Option<&Item> {
        self.items.iter().find(|item| item.kind == kind)
    }
}

/// Carry the sizes measured by a run over to the descriptors of the next one.
///
/// Failed packages contribute too: their measured partitions are updated and
/// the failed ones keep the previous value. Returns how many descriptors
/// changed.
pub fn refresh_sizes(packages: &mut [PackageDescriptor], results: &[PackageResult]) -> usize {
    let mut changed = 0;
    for pkg in packages.iter_mut() {
        let Some(result) = results
            .iter()
            .find(|r| r.package_name == pkg.package_name && r.user_id == pkg.user_id)
        else {
            continue;
        };
        if pkg.sizes != result.sizes {
            pkg.sizes = result.sizes;
            changed += 1;
        }
    }
    changed
}
