//! Byte-level progress payloads for archiving operations.
//!
//! The archiver reports an [`ArchiveProgress`] zero or more times per item;
//! the pipeline forwards every payload unmodified to the progress aggregator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Partial progress of one archiving call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveProgress {
    /// Bytes read from the source so far
    pub bytes: u64,

    /// Expected total, when a previous size is known
    pub total_bytes: Option<u64>,

    /// Percentage complete (0-100), when the total is known
    pub percent: Option<f64>,

    /// Current read speed in bytes/second
    pub bytes_per_second: u64,

    /// Free-form status line from the archiver
    pub message: Option<String>,
}

impl ArchiveProgress {
    /// Progress measured in bytes against a known size (0 = unknown)
    pub fn from_bytes(bytes: u64, known_size: u64) -> Self {
        let (total_bytes, percent) = if known_size > 0 {
            let percent = ((bytes as f64 / known_size as f64) * 100.0).min(100.0);
            (Some(known_size), Some(percent))
        } else {
            (None, None)
        };

        Self {
            bytes,
            total_bytes,
            percent,
            bytes_per_second: 0,
            message: None,
        }
    }

    /// Text-only progress
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            bytes: 0,
            total_bytes: None,
            percent: None,
            bytes_per_second: 0,
            message: Some(text.into()),
        }
    }

    pub fn with_speed(mut self, bytes_per_second: u64) -> Self {
        self.bytes_per_second = bytes_per_second;
        self
    }
}

impl fmt::Display for ArchiveProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(message) = &self.message {
            return f.write_str(message);
        }

        match (self.total_bytes, self.percent) {
            (Some(total), Some(percent)) => write!(
                f,
                "{} / {} ({:.0}%)",
                format_bytes(self.bytes),
                format_bytes(total),
                percent
            )?,
            _ => f.write_str(&format_bytes(self.bytes))?,
        }

        if self.bytes_per_second > 0 {
            write!(f, ", {}", format_speed(self.bytes_per_second))?;
        }
        Ok(())
    }
}

/// Instantaneous speed between successive byte counts
#[derive(Debug)]
pub struct RateTracker {
    last_update_time: Instant,
    last_bytes: u64,
    bytes_per_second: u64,
}

impl RateTracker {
    pub fn new() -> Self {
        Self {
            last_update_time: Instant::now(),
            last_bytes: 0,
            bytes_per_second: 0,
        }
    }

    /// Record a new cumulative byte count and return the current speed
    pub fn update(&mut self, bytes: u64) -> u64 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update_time).as_secs_f64();

        if elapsed > 0.0 {
            let bytes_diff = bytes.saturating_sub(self.last_bytes);
            self.bytes_per_second = (bytes_diff as f64 / elapsed) as u64;
        }

        self.last_update_time = now;
        self.last_bytes = bytes;
        self.bytes_per_second
    }
}

impl Default for RateTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format a size difference with an explicit sign
pub fn format_signed_bytes(delta: i64) -> String {
    let sign = if delta < 0 { '-' } else { '+' };
    format!("{}{}", sign, format_bytes(delta.unsigned_abs()))
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
