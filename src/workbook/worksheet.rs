//! Worksheet XML rewriting: manual page breaks and the drawing reference.
//!
//! The worksheet schema fixes the order of the root's children, so new
//! elements are spliced in right before the first sibling that must follow
//! them. Existing `rowBreaks`/`colBreaks` are merged with the new ones.

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use tracing::trace;

use super::package::attr_value;
use super::WorkbookError;
use crate::models::{CellRef, MAX_COLUMNS, TOTAL_ROWS};

const RELATIONSHIPS_NS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// Children of `<worksheet>` in schema order.
const WORKSHEET_CHILDREN: &[&str] = &[
    "sheetPr",
    "dimension",
    "sheetViews",
    "sheetFormatPr",
    "cols",
    "sheetData",
    "sheetCalcPr",
    "sheetProtection",
    "protectedRanges",
    "scenarios",
    "autoFilter",
    "sortState",
    "dataConsolidate",
    "customSheetViews",
    "mergeCells",
    "phoneticPr",
    "conditionalFormatting",
    "dataValidations",
    "hyperlinks",
    "printOptions",
    "pageMargins",
    "pageSetup",
    "headerFooter",
    "rowBreaks",
    "colBreaks",
    "customProperties",
    "cellWatches",
    "ignoredErrors",
    "smartTags",
    "drawing",
    "legacyDrawing",
    "legacyDrawingHF",
    "drawingHF",
    "picture",
    "oleObjects",
    "controls",
    "webPublishItems",
    "tableParts",
    "extLst",
];

fn schema_rank(local_name: &[u8]) -> Option<usize> {
    WORKSHEET_CHILDREN
        .iter()
        .position(|name| name.as_bytes() == local_name)
}

/// One `<brk>` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Break {
    pub id: u32,
    pub min: Option<u32>,
    pub max: Option<u32>,
    pub manual: bool,
    pub pivot: bool,
}

impl Break {
    fn manual(id: u32, max: u32) -> Self {
        Self {
            id,
            min: None,
            max: Some(max),
            manual: true,
            pivot: false,
        }
    }

    fn from_element(e: &BytesStart<'_>) -> Option<Self> {
        let flag = |key: &[u8]| {
            attr_value(e, key).is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        };
        Some(Self {
            id: attr_value(e, b"id")?.parse().ok()?,
            min: attr_value(e, b"min").and_then(|v| v.parse().ok()),
            max: attr_value(e, b"max").and_then(|v| v.parse().ok()),
            manual: flag(b"man"),
            pivot: flag(b"pt"),
        })
    }

    fn to_element(&self, name: &str) -> BytesStart<'static> {
        let mut brk = BytesStart::new(name.to_string());
        brk.push_attribute(("id", self.id.to_string().as_str()));
        if let Some(min) = self.min {
            brk.push_attribute(("min", min.to_string().as_str()));
        }
        if let Some(max) = self.max {
            brk.push_attribute(("max", max.to_string().as_str()));
        }
        if self.manual {
            brk.push_attribute(("man", "1"));
        }
        if self.pivot {
            brk.push_attribute(("pt", "1"));
        }
        brk
    }
}

/// Row and column page breaks of one worksheet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageBreaks {
    pub rows: Vec<Break>,
    pub cols: Vec<Break>,
}

impl PageBreaks {
    /// Adds the breaks a page-break request at `cell` implies.
    ///
    /// The row break goes above the cell and the column break to its left,
    /// each only once. Breaks at the sheet edge (row 1 / column A) are skipped.
    pub fn insert(&mut self, cell: CellRef) {
        let row = cell.row() - 1;
        let col = cell.col() - 1;

        if row != 0 && !self.rows.iter().any(|b| b.id == row) {
            self.rows.push(Break::manual(row, MAX_COLUMNS - 1));
        }
        if col != 0 && !self.cols.iter().any(|b| b.id == col) {
            self.cols.push(Break::manual(col, TOTAL_ROWS - 1));
        }
    }
}

/// `r:id` of the sheet's `<drawing>` element, if it has one.
pub fn find_drawing_rel_id(xml: &[u8], part: &str) -> Result<Option<String>, WorkbookError> {
    let mut reader = Reader::from_reader(xml);
    let mut depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if depth == 1 && e.local_name().as_ref() == b"drawing" {
                    return Ok(attr_value(&e, b"id"));
                }
                depth += 1;
            }
            Ok(Event::Empty(e)) => {
                if depth == 1 && e.local_name().as_ref() == b"drawing" {
                    return Ok(attr_value(&e, b"id"));
                }
            }
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Eof) => return Ok(None),
            Ok(_) => {}
            Err(e) => return Err(WorkbookError::xml(part)(e)),
        }
    }
}

/// Changes to splice into one worksheet part.
#[derive(Debug, Clone, Default)]
pub struct WorksheetEdit<'a> {
    /// Page-break requests, applied in order after the existing breaks.
    pub breaks: &'a [CellRef],
    /// Relationship id for a new `<drawing>` element.
    pub drawing_rel_id: Option<&'a str>,
}

struct Splicer<'a> {
    prefix: String,
    edit: WorksheetEdit<'a>,
    breaks: PageBreaks,
    breaks_written: bool,
    drawing_written: bool,
}

impl Splicer<'_> {
    fn qualified(&self, local: &str) -> String {
        if self.prefix.is_empty() {
            local.to_string()
        } else {
            format!("{}:{}", self.prefix, local)
        }
    }

    /// Writes pending elements that must precede a sibling of rank `before`
    /// (`None` means the worksheet is closing).
    fn flush(&mut self, writer: &mut Writer<Vec<u8>>, before: Option<usize>) -> quick_xml::Result<()> {
        let due = |name: &str| match (before, schema_rank(name.as_bytes())) {
            (None, _) => true,
            (Some(before), Some(rank)) => before > rank,
            (Some(_), None) => false,
        };

        if !self.breaks_written && due("colBreaks") {
            self.breaks_written = true;
            for cell in self.edit.breaks {
                self.breaks.insert(*cell);
            }
            let rows = std::mem::take(&mut self.breaks.rows);
            let cols = std::mem::take(&mut self.breaks.cols);
            self.write_breaks(writer, "rowBreaks", &rows)?;
            self.write_breaks(writer, "colBreaks", &cols)?;
        }

        if !self.drawing_written && due("drawing") {
            self.drawing_written = true;
            if let Some(rel_id) = self.edit.drawing_rel_id {
                let mut drawing = BytesStart::new(self.qualified("drawing"));
                drawing.push_attribute(("xmlns:r", RELATIONSHIPS_NS));
                drawing.push_attribute(("r:id", rel_id));
                writer.write_event(Event::Empty(drawing))?;
            }
        }
        Ok(())
    }

    fn write_breaks(
        &self,
        writer: &mut Writer<Vec<u8>>,
        local: &str,
        breaks: &[Break],
    ) -> quick_xml::Result<()> {
        if breaks.is_empty() {
            return Ok(());
        }
        let name = self.qualified(local);
        let manual = breaks.iter().filter(|b| b.manual).count();

        let mut start = BytesStart::new(name.clone());
        start.push_attribute(("count", breaks.len().to_string().as_str()));
        start.push_attribute(("manualBreakCount", manual.to_string().as_str()));
        writer.write_event(Event::Start(start))?;
        for brk in breaks {
            writer.write_event(Event::Empty(brk.to_element(&self.qualified("brk"))))?;
        }
        writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }
}

/// Reads the `<brk>` children of an existing break list up to its end tag.
fn read_breaks(reader: &mut Reader<&[u8]>, into: &mut Vec<Break>) -> quick_xml::Result<()> {
    let mut depth = 1usize;
    while depth > 0 {
        match reader.read_event()? {
            Event::Start(e) => {
                if let Some(brk) = Break::from_element(&e) {
                    into.push(brk);
                }
                depth += 1;
            }
            Event::Empty(e) => {
                if let Some(brk) = Break::from_element(&e) {
                    into.push(brk);
                }
            }
            Event::End(_) => depth -= 1,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(())
}

/// Returns the worksheet XML with the edit applied.
pub fn rewrite_worksheet(
    xml: &[u8],
    part: &str,
    edit: WorksheetEdit<'_>,
) -> Result<Vec<u8>, WorkbookError> {
    rewrite(xml, edit).map_err(WorkbookError::xml(part))
}

fn rewrite(xml: &[u8], edit: WorksheetEdit<'_>) -> quick_xml::Result<Vec<u8>> {
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len() + 512));
    let mut depth = 0usize;
    let mut splicer = Splicer {
        prefix: String::new(),
        edit,
        breaks: PageBreaks::default(),
        breaks_written: false,
        drawing_written: false,
    };

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if depth == 0 {
                    splicer.prefix = e
                        .name()
                        .prefix()
                        .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned())
                        .unwrap_or_default();
                } else if depth == 1 {
                    let local = e.local_name().as_ref().to_vec();
                    if local == b"rowBreaks" || local == b"colBreaks" {
                        let into = if local == b"rowBreaks" {
                            &mut splicer.breaks.rows
                        } else {
                            &mut splicer.breaks.cols
                        };
                        read_breaks(&mut reader, into)?;
                        continue;
                    }
                    if let Some(rank) = schema_rank(&local) {
                        splicer.flush(&mut writer, Some(rank))?;
                    }
                }
                depth += 1;
                writer.write_event(Event::Start(e))?;
            }
            Event::Empty(e) => {
                if depth == 1 {
                    let local = e.local_name();
                    if local.as_ref() == b"rowBreaks" || local.as_ref() == b"colBreaks" {
                        continue;
                    }
                    if let Some(rank) = schema_rank(local.as_ref()) {
                        splicer.flush(&mut writer, Some(rank))?;
                    }
                }
                writer.write_event(Event::Empty(e))?;
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    splicer.flush(&mut writer, None)?;
                }
                writer.write_event(Event::End(e))?;
            }
            Event::Eof => break,
            other => writer.write_event(other)?,
        }
    }

    trace!(
        breaks = splicer.edit.breaks.len(),
        drawing = splicer.edit.drawing_rel_id.is_some(),
        "Rewrote worksheet"
    );
    Ok(writer.into_inner())
}
