//! Task-level progress: events, the aggregator that folds them, and the
//! channel that connects the pipeline to it.
//!
//! Producers (the controller, package job and item processor) all run on the
//! single orchestration path and push [`ProgressEvent`]s into one unbounded
//! channel, so events for an item arrive in the order they were produced. A
//! consumer task owns the [`ProgressAggregator`] and publishes every resulting
//! [`ProgressSnapshot`] on a `watch` channel for renderers.

use crate::model::{ItemState, PartitionKind};
use crate::transfer::progress::{format_bytes, ArchiveProgress};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    TaskStarted {
        task_id: Uuid,
        total: usize,
        selected_apk: usize,
        selected_data: usize,
        user_id: u32,
    },
    PackageStarted {
        index: usize,
        package: String,
    },
    ItemStarted {
        package: String,
        kind: PartitionKind,
    },
    /// Forwarded unmodified from the archiver
    ItemProgress {
        package: String,
        kind: PartitionKind,
        progress: ArchiveProgress,
    },
    ItemFinished {
        package: String,
        kind: PartitionKind,
        state: ItemState,
        size: u64,
    },
    PackageFinished {
        index: usize,
        package: String,
        succeeded: bool,
    },
    TaskFinished {
        succeeded: usize,
        failed: usize,
        cancelled: bool,
    },
}

/// What a renderer shows at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Completed packages; never decreases, never exceeds `max`
    pub current: usize,
    /// Package count, fixed for the run
    pub max: usize,
    /// `Progress: current/max`
    pub text: String,
    /// Task-level status line
    pub status: String,
    /// Package currently being processed
    pub package: Option<String>,
    /// Latest item-level line
    pub item_text: Option<String>,
    pub finished: bool,
}

impl ProgressSnapshot {
    pub fn new(max: usize) -> Self {
        Self {
            current: 0,
            max,
            text: progress_text(0, max),
            status: "Ready".to_string(),
            package: None,
            item_text: None,
            finished: false,
        }
    }
}

fn progress_text(current: usize, max: usize) -> String {
    format!("Progress: {}/{}", current, max)
}

/// Folds progress events into a snapshot.
#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    snapshot: ProgressSnapshot,
}

impl ProgressAggregator {
    pub fn new(max: usize) -> Self {
        Self {
            snapshot: ProgressSnapshot::new(max),
        }
    }

    pub fn snapshot(&self) -> &ProgressSnapshot {
        &self.snapshot
    }

    pub fn into_snapshot(self) -> ProgressSnapshot {
        self.snapshot
    }

    pub fn apply(&mut self, event: &ProgressEvent) {
        let s = &mut self.snapshot;
        match event {
            ProgressEvent::TaskStarted {
                selected_apk,
                selected_data,
                user_id,
                ..
            } => {
                s.status = format!(
                    "Selected {} apps, {} data, user {}",
                    selected_apk, selected_data, user_id
                );
            }
            ProgressEvent::PackageStarted { package, .. } => {
                s.status = format!("Backing up {}", package);
                s.package = Some(package.clone());
                s.item_text = None;
            }
            ProgressEvent::ItemStarted { package, kind } => {
                s.item_text = Some(format!("{} {}: started", package, kind));
            }
            ProgressEvent::ItemProgress {
                package,
                kind,
                progress,
            } => {
                s.item_text = Some(format!("{} {}: {}", package, kind, progress));
            }
            ProgressEvent::ItemFinished {
                package,
                kind,
                state,
                size,
            } => {
                s.item_text = Some(match state {
                    ItemState::Done => format!("{} {}: done ({})", package, kind, format_bytes(*size)),
                    _ => format!("{} {}: failed", package, kind),
                });
            }
            ProgressEvent::PackageFinished { index, .. } => {
                let reached = (index + 1).min(s.max);
                s.current = s.current.max(reached);
                s.text = progress_text(s.current, s.max);
            }
            ProgressEvent::TaskFinished {
                succeeded,
                failed,
                cancelled,
            } => {
                s.status = if *cancelled {
                    format!("Backup cancelled: {} succeeded, {} failed", succeeded, failed)
                } else {
                    format!("Backup finished: {} succeeded, {} failed", succeeded, failed)
                };
                s.package = None;
                s.finished = true;
            }
        }
    }
}

/// Sending half handed to the pipeline.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressReporter {
    pub fn send(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            debug!("Progress consumer is gone, dropping event");
        }
    }
}

/// Consumer side of a run's progress channel.
pub struct ProgressHandle {
    task: JoinHandle<ProgressSnapshot>,
    snapshots: watch::Receiver<ProgressSnapshot>,
}

impl ProgressHandle {
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.snapshots.clone()
    }

    /// Wait for the consumer to drain; all reporters must be dropped first.
    pub async fn finish(self) -> ProgressSnapshot {
        match self.task.await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!("Progress consumer ended abnormally: {}", e);
                self.snapshots.borrow().clone()
            }
        }
    }
}

/// Spawn the aggregator for a run over `max` packages.
///
/// Every applied event is also forwarded to `listener`, when given.
pub fn spawn(
    max: usize,
    listener: Option<mpsc::UnboundedSender<ProgressEvent>>,
) -> (ProgressReporter, ProgressHandle) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let (snapshot_tx, snapshots) = watch::channel(ProgressSnapshot::new(max));

    let task = tokio::spawn(async move {
        let mut aggregator = ProgressAggregator::new(max);
        while let Some(event) = rx.recv().await {
            aggregator.apply(&event);
            snapshot_tx.send_replace(aggregator.snapshot().clone());
            if let Some(listener) = &listener {
                let _ = listener.send(event);
            }
        }
        aggregator.into_snapshot()
    });

    (ProgressReporter { tx }, ProgressHandle { task, snapshots })
}
