//! Command-line surface.
//!
//! # Usage
//!
//! ```bash
//! # Place every screenshot under ./evidence on the "Evidence" sheet
//! shotsheet -folder ./evidence -sheet Evidence -excel report.xlsx
//!
//! # Same, GNU-style, with numeric-aware ordering
//! shotsheet --folder ./evidence --sheet Evidence --excel report.xlsx --natural-sort
//!
//! # Show where each image would land without touching the workbook
//! shotsheet -folder ./evidence -sheet Evidence -excel report.xlsx --dry-run
//! ```

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::PathBuf;

use clap::Parser;

use crate::error::{Result, ShotSheetError};
use crate::layout::{ExtensionTag, PlacementConfig, DEFAULT_START_CELL};
use crate::models::CellRef;
use crate::scanner::{OrderingMode, ScanConfig};

/// Place screenshots side by side on a worksheet of an existing XLSX workbook
#[derive(Parser, Debug)]
#[command(name = "shotsheet")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to the folder containing images
    #[arg(long)]
    pub folder: Option<PathBuf>,

    /// Name of the sheet
    #[arg(long)]
    pub sheet: Option<String>,

    /// Path of the Excel workbook, updated in place
    #[arg(long)]
    pub excel: Option<PathBuf>,

    /// Cell the first image is anchored at
    #[arg(long, default_value_t = DEFAULT_START_CELL)]
    pub start_cell: CellRef,

    /// Order digit-bearing names by numeric value (img2 before img10)
    #[arg(long)]
    pub natural_sort: bool,

    /// Tag every embedded image as PNG regardless of its real format
    #[arg(long)]
    pub legacy_png_tag: bool,

    /// Print the placement plan without opening or saving the workbook
    #[arg(long)]
    pub dry_run: bool,
}

/// Validated inputs for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub folder: PathBuf,
    pub sheet: String,
    pub excel: PathBuf,
    pub scan: ScanConfig,
    pub placement: PlacementConfig,
    pub dry_run: bool,
}

impl Args {
    /// Parses the process arguments, accepting `-flag` as well as `--flag`.
    pub fn parse_env() -> Self {
        Self::parse_from(normalize_go_style_args(std::env::args_os()))
    }

    /// Checks required inputs in a fixed order and that the folder is not missing.
    pub fn validate(self) -> Result<RunOptions> {
        let folder = self
            .folder
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| {
                ShotSheetError::Validation(
                    "Please provide the image folder path using the -folder flag.".into(),
                )
            })?;
        let sheet = self.sheet.filter(|s| !s.is_empty()).ok_or_else(|| {
            ShotSheetError::Validation("Please provide the sheet name using the -sheet flag.".into())
        })?;
        let excel = self
            .excel
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| {
                ShotSheetError::Validation(
                    "Please provide the excel file path using the -excel flag.".into(),
                )
            })?;

        // Only a missing path is a validation error; other stat failures
        // surface from the walk
        if let Err(e) = std::fs::metadata(&folder) {
            if e.kind() == ErrorKind::NotFound {
                return Err(ShotSheetError::Validation(format!(
                    "The folder path does not exist: {}",
                    folder.display()
                )));
            }
        }

        let ordering = if self.natural_sort {
            OrderingMode::Natural
        } else {
            OrderingMode::Lexicographic
        };
        let extension_tag = if self.legacy_png_tag {
            ExtensionTag::LegacyPng
        } else {
            ExtensionTag::Detected
        };

        Ok(RunOptions {
            folder,
            sheet,
            excel,
            scan: ScanConfig {
                ordering,
                ..Default::default()
            },
            placement: PlacementConfig {
                start: self.start_cell,
                extension_tag,
                ..Default::default()
            },
            dry_run: self.dry_run,
        })
    }
}

/// Rewrites single-dash long flags (`-folder`, `-sheet=x`) to `--folder`,
/// `--sheet=x`. Short flags (`-h`, `-V`), `--` and anything after it are kept.
pub fn normalize_go_style_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut passthrough = false;
    let mut out = Vec::new();

    for (i, arg) in args.into_iter().enumerate() {
        let arg: OsString = arg.into();
        if i == 0 || passthrough {
            out.push(arg);
            continue;
        }

        let rewritten = arg.to_str().and_then(|s| {
            if s == "--" {
                return None;
            }
            let name = s.strip_prefix('-')?;
            let flag = name.split('=').next().unwrap_or_default();
            if flag.len() < 2 || !flag.starts_with(|c: char| c.is_ascii_alphabetic()) {
                return None;
            }
            Some(OsString::from(format!("-{s}")))
        });

        if arg == "--" {
            passthrough = true;
        }
        out.push(rewritten.unwrap_or(arg));
    }

    out
}
