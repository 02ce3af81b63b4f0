//! App Backup Library
//!
//! Backs up installed applications partition by partition into a local
//! backup root and keeps a restore catalog of every successful snapshot.

pub mod catalog;
pub mod config;
pub mod daemon;
pub mod executor;
pub mod fs;
pub mod model;
pub mod primitives;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use catalog::{Catalog, RetentionStrategy};
pub use config::Config;
pub use executor::TaskController;
pub use model::{PackageDescriptor, TaskSummary};
pub use utils::errors::{BackupError, Result};
