//! Evidence folder scanning and ordering.

pub mod file_scanner;

pub use file_scanner::{FileScanner, OrderingMode, ScanConfig};
