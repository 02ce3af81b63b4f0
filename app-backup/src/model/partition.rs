//! Partition kinds and the per-partition work item.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One data partition of an installed package.
///
/// Declaration order is the processing and display order; `weight` exposes it
/// explicitly for sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionKind {
    /// Installed binary (base + split APKs)
    Apk,
    /// Credential-encrypted private data
    User,
    /// Device-encrypted private data
    UserDe,
    /// External app-specific data
    Data,
    /// Expansion files
    Obb,
    /// External app-specific media
    Media,
}

impl PartitionKind {
    pub const ALL: [PartitionKind; 6] = [
        PartitionKind::Apk,
        PartitionKind::User,
        PartitionKind::UserDe,
        PartitionKind::Data,
        PartitionKind::Obb,
        PartitionKind::Media,
    ];

    pub fn weight(self) -> u8 {
        match self {
            PartitionKind::Apk => 1,
            PartitionKind::User => 2,
            PartitionKind::UserDe => 3,
            PartitionKind::Data => 4,
            PartitionKind::Obb => 5,
            PartitionKind::Media => 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PartitionKind::Apk => "apk",
            PartitionKind::User => "user",
            PartitionKind::UserDe => "user_de",
            PartitionKind::Data => "data",
            PartitionKind::Obb => "obb",
            PartitionKind::Media => "media",
        }
    }

    pub fn is_binary(self) -> bool {
        self == PartitionKind::Apk
    }
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Pending,
    Processing,
    Done,
    Error,
}

/// One partition attempt within a package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub kind: PartitionKind,
    pub state: ItemState,
    /// Measured size in bytes; holds the prior known size until the item succeeds
    pub size: u64,
    pub progress_text: Option<String>,
}

impl Item {
    pub fn new(kind: PartitionKind, known_size: u64) -> Self {
        Self {
            kind,
            state: ItemState::Pending,
            size: known_size,
            progress_text: None,
        }
    }

    pub fn weight(&self) -> u8 {
        self.kind.weight()
    }

    pub fn is_done(&self) -> bool {
        self.state == ItemState::Done
    }
}

/// Byte sizes per partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSizes {
    #[serde(default)]
    pub apk: u64,
    #[serde(default)]
    pub user: u64,
    #[serde(default)]
    pub user_de: u64,
    #[serde(default)]
    pub data: u64,
    #[serde(default)]
    pub obb: u64,
    #[serde(default)]
    pub media: u64,
}

impl PartitionSizes {
    pub fn get(&self, kind: PartitionKind) -> u64 {
        match kind {
            PartitionKind::Apk => self.apk,
            PartitionKind::User => self.user,
            PartitionKind::UserDe => self.user_de,
            PartitionKind::Data => self.data,
            PartitionKind::Obb => self.obb,
            PartitionKind::Media => self.media,
        }
    }

    pub fn set(&mut self, kind: PartitionKind, size: u64) {
        let slot = match kind {
            PartitionKind::Apk => &mut self.apk,
            PartitionKind::User => &mut self.user,
            PartitionKind::UserDe => &mut self.user_de,
            PartitionKind::Data => &mut self.data,
            PartitionKind::Obb => &mut self.obb,
            PartitionKind::Media => &mut self.media,
        };
        *slot = size;
    }

    pub fn total(&self) -> u64 {
        PartitionKind::ALL.iter().map(|k| self.get(*k)).sum()
    }
}
