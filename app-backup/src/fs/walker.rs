//! Directory traversal for size accounting.
//!
//! Partition directories are measured before and after archiving; the walk
//! never follows symlinks so a link into shared storage is not counted twice.

use std::path::Path;
use walkdir::WalkDir;

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Maximum depth (None = unlimited)
    pub max_depth: Option<usize>,
}

/// Result of measuring a directory tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeSize {
    pub bytes: u64,
    pub files: usize,
    /// Entries that could not be read (permissions, races with the app)
    pub skipped: usize,
}

/// Walk a directory tree and call `callback` with the size of every
/// non-directory entry (the link itself for symlinks).
///
/// Unreadable entries are counted and skipped rather than aborting the walk.
pub fn walk_directory_with_callback<F>(root: &Path, options: &WalkOptions, mut callback: F) -> usize
where
    F: FnMut(u64),
{
    let mut walker = WalkDir::new(root).follow_links(options.follow_links);

    if let Some(max_depth) = options.max_depth {
        walker = walker.max_depth(max_depth);
    }

    let mut skipped = 0;
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => {
                skipped += 1;
                continue;
            }
        };

        if entry.file_type().is_dir() {
            continue;
        }

        match entry.metadata() {
            Ok(metadata) => callback(metadata.len()),
            Err(_) => skipped += 1,
        }
    }

    skipped
}

/// Calculate total size of all files in a directory
pub fn calculate_total_size(root: &Path, options: &WalkOptions) -> TreeSize {
    let mut size = TreeSize::default();

    let skipped = walk_directory_with_callback(root, options, |bytes| {
        size.bytes += bytes;
        size.files += 1;
    });
    size.skipped = skipped;

    size
}
