//! `tar`-based archiver with optional zstd compression.
//!
//! `tar` runs with the archive on stdout; the bytes are counted for progress
//! and written (compressed or not) into `{dest}/{kind}.{ext}.partial`, which
//! is renamed over `{dest}/{kind}.{ext}` once tar has exited cleanly.

use super::{ArchiveRequest, Archiver, ProgressFn};
use crate::transfer::progress::{ArchiveProgress, RateTracker};
use crate::transfer::progress_stream::ProgressStream;
use crate::utils::errors::{BackupError, Result};
use async_compression::tokio::write::ZstdEncoder;
use async_compression::Level;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::process::Command;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    /// Plain tar
    Tar,
    /// tar compressed with zstd
    #[default]
    Zstd,
}

impl CompressionType {
    pub fn extension(self) -> &'static str {
        match self {
            CompressionType::Tar => "tar",
            CompressionType::Zstd => "tar.zst",
        }
    }
}

/// Archiving tool; toybox and busybox both provide it as `tar`
const TAR: &str = "tar";

/// Suffix of the file an archive is written to before it replaces the previous one
const PARTIAL_SUFFIX: &str = "partial";

#[derive(Debug, Clone)]
pub struct TarArchiver {
    compression: CompressionType,
    level: i32,
}

impl TarArchiver {
    pub fn new(compression: CompressionType, level: i32) -> Self {
        Self { compression, level }
    }

    pub fn archive_path(&self, request: &ArchiveRequest<'_>) -> PathBuf {
        request
            .dest_dir
            .join(format!("{}.{}", request.kind, self.compression.extension()))
    }

    fn sink(&self, file: tokio::fs::File) -> Box<dyn AsyncWrite + Unpin + Send> {
        let writer = BufWriter::new(file);
        match self.compression {
            CompressionType::Tar => Box::new(writer),
            CompressionType::Zstd => {
                Box::new(ZstdEncoder::with_quality(writer, Level::Precise(self.level)))
            }
        }
    }

    /// Pipe `tar` stdout into `dest`, reporting progress as bytes arrive.
    async fn run_tar(
        &self,
        request: &ArchiveRequest<'_>,
        dest: &Path,
        on_progress: ProgressFn<'_>,
    ) -> Result<u64> {
        // The binary partition archives the contents of its own directory
        let member = if request.kind.is_binary() {
            "."
        } else {
            request.package
        };

        let mut child = Command::new(TAR)
            .arg("-cpf")
            .arg("-")
            .arg("-C")
            .arg(request.source)
            .arg(member)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackupError::Archive(format!("failed to spawn {}: {}", TAR, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackupError::Archive("tar stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BackupError::Archive("tar stderr not captured".to_string()))?;

        let file = tokio::fs::File::create(dest).await?;
        let mut sink = self.sink(file);

        let known_size = request.known_size;
        let mut rate = RateTracker::new();
        let mut stream = ProgressStream::new(ReaderStream::new(stdout), |bytes| {
            let speed = rate.update(bytes);
            on_progress(ArchiveProgress::from_bytes(bytes, known_size).with_speed(speed));
        });

        let copy = async {
            let copied = async {
                while let Some(chunk) = stream.next().await {
                    sink.write_all(&chunk?).await?;
                }
                sink.shutdown().await?;
                Ok::<u64, BackupError>(stream.bytes_transferred())
            }
            .await;

            // tar must not stay blocked on a pipe nobody reads
            drop(stream);
            if copied.is_err() {
                if let Err(e) = child.start_kill() {
                    warn!("Failed to stop {}: {}", TAR, e);
                }
            }
            copied
        };

        // stderr is drained concurrently so tar never blocks on a full pipe
        let (copied, diagnostics) = tokio::join!(copy, read_all(stderr));
        let status = child.wait().await?;
        let bytes = copied?;

        let diagnostics = diagnostics.unwrap_or_default();
        if !status.success() {
            return Err(BackupError::Archive(format!(
                "{} exited with {}: {}",
                TAR,
                status,
                diagnostics.trim()
            )));
        }
        if !diagnostics.trim().is_empty() {
            on_progress(ArchiveProgress::message(diagnostics.trim()));
        }

        Ok(bytes)
    }
}

/// `{archive}.partial` next to the archive, so the rename stays on one filesystem
fn partial_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_os_string();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<String> {
    let mut buf = String::new();
    reader.read_to_string(&mut buf).await?;
    Ok(buf)
}

impl Archiver for TarArchiver {
    /// The previous archive at the destination is only replaced once the new
    /// one is complete.
    async fn compress(&self, request: &ArchiveRequest<'_>, on_progress: ProgressFn<'_>) -> Result<()> {
        tokio::fs::create_dir_all(request.dest_dir).await?;
        let dest = self.archive_path(request);
        let partial = partial_path(&dest);

        let result = match self.run_tar(request, &partial, on_progress).await {
            Ok(bytes) => tokio::fs::rename(&partial, &dest)
                .await
                .map(|()| bytes)
                .map_err(BackupError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(bytes) => {
                debug!(
                    "Archived {} {} ({} bytes read) into {}",
                    request.package,
                    request.kind,
                    bytes,
                    dest.display()
                );
                Ok(())
            }
            Err(e) => {
                if let Err(remove) = tokio::fs::remove_file(&partial).await {
                    if remove.kind() != std::io::ErrorKind::NotFound {
                        warn!("Failed to remove partial archive {}: {}", partial.display(), remove);
                    }
                }
                Err(e)
            }
        }
    }
}
