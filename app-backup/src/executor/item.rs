//! Archiving of one partition of one package.

use super::progress::{ProgressEvent, ProgressReporter};
use crate::model::PartitionKind;
use crate::primitives::{ArchiveRequest, Archiver, DeviceFs, SizeMode};
use crate::transfer::progress::ArchiveProgress;
use std::path::Path;
use tracing::{debug, warn};

/// Result of one item attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemOutcome {
    pub succeeded: bool,
    /// Size re-measured from disk after a successful archive
    pub measured_size: Option<u64>,
}

impl ItemOutcome {
    pub(crate) fn failed() -> Self {
        Self {
            succeeded: false,
            measured_size: None,
        }
    }
}

/// Drives the archiver for a single partition. No retries: a failed item is
/// final for the run.
pub struct ItemProcessor<'a, F, A> {
    fs: &'a F,
    archiver: &'a A,
    reporter: &'a ProgressReporter,
}

impl<'a, F: DeviceFs, A: Archiver> ItemProcessor<'a, F, A> {
    pub fn new(fs: &'a F, archiver: &'a A, reporter: &'a ProgressReporter) -> Self {
        Self {
            fs,
            archiver,
            reporter,
        }
    }

    /// Archive `kind` of `package` from `source` into `dest_dir`.
    ///
    /// Every progress payload from the archiver is forwarded as an
    /// `ItemProgress` event as soon as it is reported.
    pub async fn run(
        &self,
        package: &str,
        user_id: u32,
        kind: PartitionKind,
        known_size: u64,
        source: &Path,
        dest_dir: &Path,
    ) -> ItemOutcome {
        let request = ArchiveRequest {
            kind,
            package,
            user_id,
            source,
            dest_dir,
            known_size,
        };

        let reporter = self.reporter;
        let on_progress = move |progress: ArchiveProgress| {
            reporter.send(ProgressEvent::ItemProgress {
                package: package.to_string(),
                kind,
                progress,
            });
        };

        if let Err(e) = self.archiver.compress(&request, &on_progress).await {
            warn!("Archiving {} {} failed: {}", package, kind, e);
            return ItemOutcome::failed();
        }

        // Measure what is on disk rather than trusting the archiver's count
        let measured = self.fs.count_size(&request.source_dir(), SizeMode::Tree).await;
        debug!("{} {} archived, {} bytes on disk", package, kind, measured);

        ItemOutcome {
            succeeded: true,
            measured_size: Some(measured),
        }
    }
}
