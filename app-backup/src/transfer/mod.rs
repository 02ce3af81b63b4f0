//! Byte-level progress reporting for archive writes.

pub mod progress;
pub mod progress_stream;
