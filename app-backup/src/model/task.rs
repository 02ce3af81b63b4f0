//! One backup run and its summary.

use super::package::PackageResult;
use crate::executor::progress::ProgressSnapshot;
use crate::transfer::progress::{format_duration, format_signed_bytes};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Idle,
    Processing,
    /// Every package was attempted
    Done,
    /// Cancellation stopped the run before every package was attempted
    Cancelled,
}

/// A backup run. Only the task controller mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub state: TaskState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub start_size: u64,
    pub end_size: u64,
    pub results: Vec<PackageResult>,
}

impl Task {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: TaskState::Idle,
            started_at: None,
            finished_at: None,
            start_size: 0,
            end_size: 0,
            results: Vec::new(),
        }
    }

    pub(crate) fn start(&mut self, now: DateTime<Utc>, store_size: u64) {
        self.state = TaskState::Processing;
        self.started_at = Some(now);
        self.start_size = store_size;
    }

    pub(crate) fn record(&mut self, result: PackageResult) {
        debug_assert_eq!(self.state, TaskState::Processing);
        self.results.push(result);
    }

    pub(crate) fn finish(&mut self, now: DateTime<Utc>, store_size: u64, cancelled: bool) {
        self.finished_at = Some(now);
        self.end_size = store_size;
        self.state = if cancelled {
            TaskState::Cancelled
        } else {
            TaskState::Done
        };
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &PackageResult> {
        self.results.iter().filter(|r| r.succeeded)
    }

    pub fn failed(&self) -> impl Iterator<Item = &PackageResult> {
        self.results.iter().filter(|r| !r.succeeded)
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

/// Final report of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: Uuid,
    pub state: TaskState,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    /// Packages never attempted because the run was cancelled
    pub skipped: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub start_size: u64,
    pub end_size: u64,
    pub progress: ProgressSnapshot,
    /// Per-package items and measured sizes, in run order
    pub packages: Vec<PackageResult>,
    pub environment_errors: Vec<String>,
    pub persist_error: Option<String>,
}

impl TaskSummary {
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// Growth of the backup store over the run
    pub fn size_delta(&self) -> i64 {
        self.end_size as i64 - self.start_size as i64
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// One-line human readable report
    pub fn describe(&self) -> String {
        format!(
            "{} total, {} succeeded, {} failed, {} skipped in {} ({})",
            self.total(),
            self.succeeded.len(),
            self.failed.len(),
            self.skipped.len(),
            format_duration(self.elapsed().num_seconds().max(0) as u64),
            format_signed_bytes(self.size_delta()),
        )
    }
}
