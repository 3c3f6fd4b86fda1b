use std::fmt;

use tracing::{debug, info};

use crate::error::{Result, ShotSheetError};
use crate::image_loader::ProbedImage;
use crate::models::{CellRef, CellRefError};
use crate::workbook::{DocumentSink, ImageExtension, Picture};

/// Where the first image goes unless configured otherwise.
pub const DEFAULT_START_CELL: CellRef = CellRef::at(2, 4);

/// Which extension tag embedded images carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtensionTag {
    /// Tag each image with its sniffed format.
    #[default]
    Detected,
    /// Tag every image as `.png`, whatever its real encoding.
    LegacyPng,
}

/// Configuration for the horizontal slot layout.
///
/// Images are placed left-to-right on one row, one slot every
/// `column_stride` columns, each stretched to the same footprint.
#[derive(Debug, Clone)]
pub struct PlacementConfig {
    /// Anchor cell of the first slot (default: B4)
    pub start: CellRef,
    /// Footprint width in pixels (default: 1115.9)
    pub target_width: f64,
    /// Footprint height in pixels (default: 609.2)
    pub target_height: f64,
    /// Columns between slot anchors (default: 37)
    pub column_stride: u32,
    /// Row every page break is requested at (default: 40)
    pub page_break_row: u32,
    pub extension_tag: ExtensionTag,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            start: DEFAULT_START_CELL,
            target_width: 1115.9,
            target_height: 609.2,
            column_stride: 37,
            page_break_row: 40,
            extension_tag: ExtensionTag::Detected,
        }
    }
}

/// Cursor for the next slot. Moves right by the stride after each image;
/// the row never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    col: u32,
    row: u32,
}

impl Anchor {
    pub fn new(start: CellRef) -> Self {
        Self {
            col: start.col(),
            row: start.row(),
        }
    }

    pub fn cell(self) -> std::result::Result<CellRef, CellRefError> {
        CellRef::new(self.col, self.row)
    }

    pub fn advance(self, stride: u32) -> Self {
        Self {
            col: self.col.saturating_add(stride),
            row: self.row,
        }
    }
}

/// One image's slot in the plan.
#[derive(Debug, Clone)]
pub struct PlacementStep {
    pub image: ProbedImage,
    pub cell: CellRef,
    pub scale_x: f64,
    pub scale_y: f64,
    pub extension: ImageExtension,
    /// Break requested after this image is inserted.
    pub page_break: Option<CellRef>,
}

impl fmt::Display for PlacementStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<6} {}x{} -> scale {:.6} x {:.6} .{:<4} break {:<7} {}",
            self.cell.to_string(),
            self.image.width,
            self.image.height,
            self.scale_x,
            self.scale_y,
            self.extension.extension,
            self.page_break.map_or_else(|| "-".to_string(), |c| c.to_string()),
            self.image.image,
        )
    }
}

/// Every slot computed up front, before the document is touched.
#[derive(Debug, Clone, Default)]
pub struct PlacementPlan {
    pub steps: Vec<PlacementStep>,
}

/// Counts of what a plan wrote to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlacementSummary {
    pub images: usize,
    pub page_breaks: usize,
}

impl PlacementPlan {
    /// Computes the slot, scale factors and page break of every image.
    ///
    /// # Algorithm
    /// 1. Image `k` goes to the current anchor; scale factors stretch it to
    ///    the target footprint on each axis independently.
    /// 2. The anchor moves right by the stride.
    /// 3. Every image but the first requests a page break in the column
    ///    just left of the moved anchor, on the page-break row.
    ///
    /// Slots past the last worksheet column are rejected.
    pub fn compute(
        config: &PlacementConfig,
        images: Vec<ProbedImage>,
    ) -> std::result::Result<Self, CellRefError> {
        let mut anchor = Anchor::new(config.start);
        let mut steps = Vec::with_capacity(images.len());

        for (index, image) in images.into_iter().enumerate() {
            let cell = anchor.cell()?;
            let scale_x = config.target_width / f64::from(image.width);
            let scale_y = config.target_height / f64::from(image.height);
            let extension = match config.extension_tag {
                ExtensionTag::Detected => ImageExtension::from_format(image.format),
                ExtensionTag::LegacyPng => ImageExtension::PNG,
            };

            anchor = anchor.advance(config.column_stride);

            let page_break = if index > 0 {
                Some(CellRef::new(anchor.col - 1, config.page_break_row)?)
            } else {
                None
            };

            steps.push(PlacementStep {
                image,
                cell,
                scale_x,
                scale_y,
                extension,
                page_break,
            });
        }

        Ok(Self { steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Writes the plan through `sink`, in order. Does not save.
    ///
    /// The first rejected request aborts; nothing after it is inserted.
    pub fn apply<S: DocumentSink + ?Sized>(self, sink: &mut S, sheet: &str) -> Result<PlacementSummary> {
        let mut summary = PlacementSummary::default();

        for step in self.steps {
            let path = step.image.image.to_string();
            let picture = Picture {
                name: step.image.image.file_name().to_string_lossy().into_owned(),
                bytes: step.image.bytes,
                extension: step.extension,
                width: step.image.width,
                height: step.image.height,
                scale_x: step.scale_x,
                scale_y: step.scale_y,
                auto_fit: false,
            };

            debug!(
                cell = %step.cell,
                scale_x = step.scale_x,
                scale_y = step.scale_y,
                extension = step.extension.extension,
                "Inserting {}",
                path
            );
            sink.insert_image(sheet, step.cell, picture).map_err(|e| {
                ShotSheetError::document(format!("failed to insert image {path}"), e)
            })?;
            summary.images += 1;

            if let Some(cell) = step.page_break {
                debug!(%cell, "Inserting page break");
                sink.insert_page_break(sheet, cell).map_err(|e| {
                    ShotSheetError::document(format!("failed to insert page break at {cell}"), e)
                })?;
                summary.page_breaks += 1;
            }
        }

        info!(
            images = summary.images,
            page_breaks = summary.page_breaks,
            "Placement complete"
        );
        Ok(summary)
    }
}
