//! Restore catalog: per-package history of successful backup snapshots.
//!
//! The catalog is loaded once when a task starts, mutated only by the task's
//! orchestration path through [`Catalog::merge`], and saved once at the end.

pub mod store;

use crate::model::PartitionSizes;
use crate::utils::errors::{BackupError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub use store::{CatalogStore, JsonCatalogStore};

/// Date key used by [`RetentionStrategy::Cover`]
pub const COVER_DATE_KEY: &str = "Cover";

/// Identifies one snapshot within a package's restore history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DateKey(String);

impl DateKey {
    pub fn cover() -> Self {
        DateKey(COVER_DATE_KEY.to_string())
    }

    /// Milliseconds since the Unix epoch
    pub fn from_timestamp(now: DateTime<Utc>) -> Self {
        DateKey(now.timestamp_millis().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_cover(&self) -> bool {
        self.0 == COVER_DATE_KEY
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether successive successful runs overwrite or accumulate snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionStrategy {
    /// Every run writes to the single `Cover` snapshot
    #[default]
    Cover,
    /// Every run appends a snapshot keyed by its timestamp
    Versioned,
}

impl RetentionStrategy {
    pub fn date_key(self, now: DateTime<Utc>) -> DateKey {
        match self {
            RetentionStrategy::Cover => DateKey::cover(),
            RetentionStrategy::Versioned => DateKey::from_timestamp(now),
        }
    }
}

impl FromStr for RetentionStrategy {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cover" => Ok(RetentionStrategy::Cover),
            "versioned" => Ok(RetentionStrategy::Versioned),
            other => Err(BackupError::Config(format!(
                "unknown retention strategy '{other}' (expected cover or versioned)"
            ))),
        }
    }
}

/// One dated backup of a package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub date: DateKey,
    pub sizes: PartitionSizes,
    #[serde(default)]
    pub version_name: String,
    #[serde(default)]
    pub version_code: i64,
    pub has_apk: bool,
    pub has_data: bool,
    pub created_at: DateTime<Utc>,
}

/// Restore history of one package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreEntry {
    pub package_name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub user_id: u32,
    #[serde(default)]
    pub first_install_time: i64,
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
    /// Number of distinct snapshots ever appended
    #[serde(default)]
    pub version_index: u32,
}

impl RestoreEntry {
    pub fn new(origin: &EntryOrigin<'_>) -> Self {
        Self {
            package_name: origin.package_name.to_string(),
            label: origin.label.to_string(),
            user_id: origin.user_id,
            first_install_time: origin.first_install_time,
            snapshots: Vec::new(),
            version_index: 0,
        }
    }

    pub fn position(&self, date: &DateKey) -> Option<usize> {
        self.snapshots.iter().position(|s| &s.date == date)
    }

    pub fn snapshot(&self, date: &DateKey) -> Option<&Snapshot> {
        self.snapshots.iter().find(|s| &s.date == date)
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    /// Reject entries that a merge could not keep consistent.
    fn validate(&self, key: &str) -> Result<()> {
        if self.package_name != key {
            return Err(BackupError::CatalogCorrupt {
                package: key.to_string(),
                reason: format!("entry is recorded under package '{}'", self.package_name),
            });
        }

        let mut seen = HashSet::with_capacity(self.snapshots.len());
        for snapshot in &self.snapshots {
            if !seen.insert(snapshot.date.as_str()) {
                return Err(BackupError::CatalogCorrupt {
                    package: key.to_string(),
                    reason: format!("duplicate date key {}", snapshot.date),
                });
            }
        }

        Ok(())
    }
}

/// Descriptive fields used when a package gets its first restore entry.
#[derive(Debug, Clone, Copy)]
pub struct EntryOrigin<'a> {
    pub package_name: &'a str,
    pub label: &'a str,
    pub user_id: u32,
    pub first_install_time: i64,
}

/// Where a package result landed in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreRef {
    pub package_name: String,
    pub snapshot_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A new date key was appended and the version index advanced
    Appended(RestoreRef),
    /// The snapshot with the same date key was replaced in place
    Replaced(RestoreRef),
}

impl MergeOutcome {
    pub fn restore_ref(&self) -> &RestoreRef {
        match self {
            MergeOutcome::Appended(r) | MergeOutcome::Replaced(r) => r,
        }
    }

    pub fn into_restore_ref(self) -> RestoreRef {
        match self {
            MergeOutcome::Appended(r) | MergeOutcome::Replaced(r) => r,
        }
    }
}

/// Record of one finished backup run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub tool_version: String,
    pub task_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub start_size: u64,
    pub end_size: u64,
    pub kind: String,
    pub user_id: u32,
    pub device: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    entries: BTreeMap<String, RestoreEntry>,
    #[serde(default)]
    runs: Vec<RunRecord>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, package_name: &str) -> Option<&RestoreEntry> {
        self.entries.get(package_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn runs(&self) -> &[RunRecord] {
        &self.runs
    }

    pub fn record_run(&mut self, record: RunRecord) {
        self.runs.push(record);
    }

    /// Insert `snapshot` into the history of `origin.package_name`.
    ///
    /// A snapshot with the same date key is replaced at its index; otherwise
    /// the snapshot is appended and the version index advances. Snapshots are
    /// never removed. A corrupt entry is left untouched and reported.
    pub fn merge(&mut self, origin: &EntryOrigin<'_>, snapshot: Snapshot) -> Result<MergeOutcome> {
        let key = origin.package_name;
        if let Some(existing) = self.entries.get(key) {
            existing.validate(key)?;
        }

        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| RestoreEntry::new(origin));

        match entry.position(&snapshot.date) {
            Some(index) => {
                entry.snapshots[index] = snapshot;
                Ok(MergeOutcome::Replaced(RestoreRef {
                    package_name: key.to_string(),
                    snapshot_index: index,
                }))
            }
            None => {
                entry.snapshots.push(snapshot);
                entry.version_index += 1;
                Ok(MergeOutcome::Appended(RestoreRef {
                    package_name: key.to_string(),
                    snapshot_index: entry.snapshots.len() - 1,
                }))
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn insert_entry(&mut self, key: &str, entry: RestoreEntry) {
        self.entries.insert(key.to_string(), entry);
    }
}
