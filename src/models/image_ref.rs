use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};

/// One file discovered in the evidence folder.
///
/// Immutable once produced by the scanner; the placement stage only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    path: PathBuf,
}

impl ImageRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Final path component, the only part ordering looks at.
    pub fn file_name(&self) -> &OsStr {
        self.path.file_name().unwrap_or(self.path.as_os_str())
    }

    /// File name as raw bytes, for byte-order comparison.
    pub fn file_name_bytes(&self) -> &[u8] {
        self.file_name().as_encoded_bytes()
    }

    /// Whether the file name carries at least one ASCII digit.
    pub fn has_digit(&self) -> bool {
        self.file_name_bytes().iter().any(u8::is_ascii_digit)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
