//! Spreadsheet document store.
//!
//! This module provides:
//! - `DocumentSink` - the capability the placement stage writes through
//! - `XlsxDocument` - an in-place XLSX implementation (zip + XML parts)
//! - `Picture` / `ImageExtension` - what an insert-image request carries
//!
//! Mutations are queued in memory and only reach disk on `save`, so a run
//! that fails part way leaves the template untouched.

pub mod drawing;
pub mod package;
pub mod worksheet;
pub mod xlsx;

use image::ImageFormat;
use thiserror::Error;

use crate::models::{CellRef, CellRefError};

pub use xlsx::XlsxDocument;

#[derive(Error, Debug)]
pub enum WorkbookError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML error in {part}: {source}")]
    Xml {
        part: String,
        #[source]
        source: quick_xml::Error,
    },

    #[error("missing package part {0}")]
    MissingPart(String),

    #[error("sheet {0} does not exist")]
    UnknownSheet(String),

    #[error(transparent)]
    Cell(#[from] CellRefError),

    #[error("malformed package: {0}")]
    Malformed(String),
}

impl WorkbookError {
    pub(crate) fn xml(part: &str) -> impl FnOnce(quick_xml::Error) -> Self + '_ {
        move |source| Self::Xml {
            part: part.to_string(),
            source,
        }
    }
}

/// File extension and content type an embedded image is tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageExtension {
    pub extension: &'static str,
    pub content_type: &'static str,
}

impl ImageExtension {
    pub const PNG: Self = Self {
        extension: "png",
        content_type: "image/png",
    };

    /// Tag matching the image's real encoding.
    pub fn from_format(format: ImageFormat) -> Self {
        match format.extensions_str().first() {
            Some(&extension) => Self {
                extension,
                content_type: format.to_mime_type(),
            },
            None => Self::PNG,
        }
    }
}

/// One insert-image request.
#[derive(Debug, Clone)]
pub struct Picture {
    /// Shown as the picture's description (alt text).
    pub name: String,
    pub bytes: Vec<u8>,
    pub extension: ImageExtension,
    /// Source pixel size.
    pub width: u32,
    pub height: u32,
    pub scale_x: f64,
    pub scale_y: f64,
    pub auto_fit: bool,
}

impl Picture {
    /// Rendered footprint in pixels, truncated toward zero.
    pub fn footprint(&self) -> (u32, u32) {
        let width = (f64::from(self.width) * self.scale_x) as u32;
        let height = (f64::from(self.height) * self.scale_y) as u32;
        (width.max(1), height.max(1))
    }
}

/// Mutation capability over an open spreadsheet document.
pub trait DocumentSink {
    /// Whether the document has a worksheet with this name.
    fn has_sheet(&self, sheet: &str) -> bool;

    /// Anchors a picture at `cell`, scaled by the picture's factors.
    fn insert_image(
        &mut self,
        sheet: &str,
        cell: CellRef,
        picture: Picture,
    ) -> Result<(), WorkbookError>;

    /// Adds a manual page break above and left of `cell`.
    fn insert_page_break(&mut self, sheet: &str, cell: CellRef) -> Result<(), WorkbookError>;

    /// Persists every queued mutation.
    fn save(&mut self) -> Result<(), WorkbookError>;
}
