//! File scanner that turns an evidence folder into an ordered image list.
//!
//! This module provides the `FileScanner` struct which handles:
//! - Recursive directory scanning using walkdir
//! - Flattening nested folders into one sequence
//! - Ordering: names without digits first, then byte order within each class

use std::cmp::Ordering;
use std::path::Path;

use tracing::{debug, info, trace};
use walkdir::WalkDir;

use crate::error::{Result, ShotSheetError};
use crate::models::ImageRef;

/// How file names compare inside the same digit-presence class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderingMode {
    /// Plain byte order, so `image10` sorts before `image2`.
    #[default]
    Lexicographic,
    /// Digit runs compare by numeric value, so `image2` sorts before `image10`.
    Natural,
}

impl OrderingMode {
    /// Total order over two image references, looking at file names only.
    ///
    /// A name that contains no ASCII digit always sorts before one that does.
    pub fn compare(self, a: &ImageRef, b: &ImageRef) -> Ordering {
        a.has_digit().cmp(&b.has_digit()).then_with(|| {
            let (a, b) = (a.file_name_bytes(), b.file_name_bytes());
            match self {
                Self::Lexicographic => a.cmp(b),
                Self::Natural => natural_cmp(a, b),
            }
        })
    }
}

/// Configuration for the file scanner.
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// Whether to follow symbolic links.
    pub follow_symlinks: bool,
    /// Comparison used within a digit-presence class.
    pub ordering: OrderingMode,
}

/// Scanner for evidence folders.
pub struct FileScanner {
    config: ScanConfig,
}

impl FileScanner {
    /// Creates a new file scanner with default configuration.
    pub fn new() -> Self {
        Self {
            config: ScanConfig::default(),
        }
    }

    /// Creates a new file scanner with custom configuration.
    pub fn with_config(config: ScanConfig) -> Self {
        Self { config }
    }

    /// Scans a directory and returns every file in it, ordered for placement.
    ///
    /// No extension filtering happens here; anything the walk reports as a
    /// non-directory is a candidate. The first traversal error aborts the scan.
    pub fn scan(&self, dir: &Path) -> Result<Vec<ImageRef>> {
        info!("Starting scan of {:?}", dir);

        let mut images = self.discover_files(dir)?;
        debug!("Discovered {} files", images.len());

        // sort_by is stable, ties keep walk order
        let ordering = self.config.ordering;
        images.sort_by(|a, b| ordering.compare(a, b));

        info!(
            count = images.len(),
            ordering = ?ordering,
            "Scan complete"
        );
        Ok(images)
    }

    /// Discovers all files below a directory, flattened.
    fn discover_files(&self, dir: &Path) -> Result<Vec<ImageRef>> {
        let walker = WalkDir::new(dir)
            .follow_links(self.config.follow_symlinks)
            .sort_by_file_name();

        let mut entries = Vec::new();

        for entry in walker {
            let entry = entry.map_err(|source| ShotSheetError::Filesystem {
                path: dir.to_path_buf(),
                source,
            })?;

            // Skip directories
            if entry.file_type().is_dir() {
                continue;
            }

            trace!("Found {:?}", entry.path());
            entries.push(ImageRef::new(entry.into_path()));
        }

        Ok(entries)
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn natural_cmp(a: &[u8], b: &[u8]) -> Ordering {
    let (mut i, mut j) = (0, 0);

    while i < a.len() && j < b.len() {
        if a[i].is_ascii_digit() && b[j].is_ascii_digit() {
            let end_a = digit_run_end(a, i);
            let end_b = digit_run_end(b, j);
            let num_a = trim_leading_zeros(&a[i..end_a]);
            let num_b = trim_leading_zeros(&b[j..end_b]);

            let ord = num_a.len().cmp(&num_b.len()).then_with(|| num_a.cmp(num_b));
            if ord != Ordering::Equal {
                return ord;
            }
            i = end_a;
            j = end_b;
        } else {
            let ord = a[i].cmp(&b[j]);
            if ord != Ordering::Equal {
                return ord;
            }
            i += 1;
            j += 1;
        }
    }

    // Equal so far: shorter remainder first, then raw bytes ("01" vs "1")
    (a.len() - i).cmp(&(b.len() - j)).then_with(|| a.cmp(b))
}

fn digit_run_end(s: &[u8], start: usize) -> usize {
    s[start..]
        .iter()
        .position(|b| !b.is_ascii_digit())
        .map_or(s.len(), |n| start + n)
}

fn trim_leading_zeros(digits: &[u8]) -> &[u8] {
    let first = digits.iter().position(|&b| b != b'0').unwrap_or(digits.len());
    &digits[first..]
}
