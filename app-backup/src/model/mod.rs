//! Data model of a backup run: partitions, packages and the task itself.

pub mod package;
pub mod partition;
pub mod task;

pub use package::{refresh_sizes, PackageDescriptor, PackageResult};
pub use partition::{Item, ItemState, PartitionKind, PartitionSizes};
pub use task::{Task, TaskState, TaskSummary};
