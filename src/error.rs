//! Error taxonomy for a shotsheet run.
//!
//! Every variant is terminal: the pipeline stops, the message is printed and
//! the workbook is never saved.

use std::path::PathBuf;

use thiserror::Error;

use crate::workbook::WorkbookError;

#[derive(Error, Debug)]
pub enum ShotSheetError {
    /// Missing or invalid command-line input.
    #[error("{0}")]
    Validation(String),

    /// The image folder could not be walked.
    #[error("Error walking through the folder {path:?}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// An image could not be read or is not a supported raster format.
    #[error("failed to get image dimensions for {path:?}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The workbook rejected an open, insert or save request.
    #[error("{action}: {source}")]
    DocumentWrite {
        action: String,
        #[source]
        source: WorkbookError,
    },
}

impl ShotSheetError {
    pub fn document(action: impl Into<String>, source: WorkbookError) -> Self {
        Self::DocumentWrite {
            action: action.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ShotSheetError>;
