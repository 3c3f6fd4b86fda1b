//! SpreadsheetML drawing parts holding the embedded pictures.

use std::fmt::Write as _;

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;

use super::package::attr_value;
use super::WorkbookError;
use crate::models::CellRef;

pub const DRAWING_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.drawing+xml";
pub const DRAWING_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/drawing";
pub const IMAGE_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";

const XDR_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing";
const A_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const R_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// English Metric Units per screen pixel at 96 DPI.
pub const EMU_PER_PIXEL: u64 = 9525;

/// A picture pinned by its top-left corner to one cell.
#[derive(Debug, Clone, PartialEq)]
pub struct PictureAnchor {
    pub cell: CellRef,
    pub width_px: u32,
    pub height_px: u32,
    /// Relationship id of the media part, in the drawing's rels.
    pub rel_id: String,
    /// Shape id, unique within the drawing.
    pub shape_id: u32,
    pub description: String,
}

impl PictureAnchor {
    fn write_xml(&self, out: &mut String, declare_namespaces: bool) {
        let cx = u64::from(self.width_px) * EMU_PER_PIXEL;
        let cy = u64::from(self.height_px) * EMU_PER_PIXEL;

        out.push_str("<xdr:oneCellAnchor");
        if declare_namespaces {
            let _ = write!(out, r#" xmlns:xdr="{XDR_NS}" xmlns:a="{A_NS}""#);
        }
        out.push('>');
        let _ = write!(
            out,
            "<xdr:from><xdr:col>{}</xdr:col><xdr:colOff>0</xdr:colOff>\
             <xdr:row>{}</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:from>",
            self.cell.col() - 1,
            self.cell.row() - 1,
        );
        let _ = write!(out, r#"<xdr:ext cx="{cx}" cy="{cy}"/>"#);
        let _ = write!(
            out,
            r#"<xdr:pic><xdr:nvPicPr><xdr:cNvPr id="{id}" name="Picture {id}" descr="{descr}"/><xdr:cNvPicPr/></xdr:nvPicPr>"#,
            id = self.shape_id,
            descr = escape(self.description.as_str()),
        );
        let _ = write!(
            out,
            r#"<xdr:blipFill><a:blip xmlns:r="{R_NS}" r:embed="{}"/><a:stretch><a:fillRect/></a:stretch></xdr:blipFill>"#,
            escape(self.rel_id.as_str()),
        );
        let _ = write!(
            out,
            r#"<xdr:spPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="{cx}" cy="{cy}"/></a:xfrm><a:prstGeom prst="rect"><a:avLst/></a:prstGeom></xdr:spPr></xdr:pic>"#,
        );
        out.push_str("<xdr:clientData/></xdr:oneCellAnchor>");
    }
}

/// A fresh drawing part holding `anchors`.
pub fn new_drawing_xml(anchors: &[PictureAnchor]) -> Vec<u8> {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    xml.push('\n');
    let _ = write!(xml, r#"<xdr:wsDr xmlns:xdr="{XDR_NS}" xmlns:a="{A_NS}">"#);
    for anchor in anchors {
        anchor.write_xml(&mut xml, false);
    }
    xml.push_str("</xdr:wsDr>");
    xml.into_bytes()
}

/// Existing drawing part with `anchors` appended before its closing tag.
///
/// Appended anchors declare their own namespaces, so the prefixes the
/// existing part happens to use do not matter.
pub fn append_to_drawing(
    xml: &[u8],
    part: &str,
    anchors: &[PictureAnchor],
) -> Result<Vec<u8>, WorkbookError> {
    // validate before splicing
    max_shape_id(xml, part)?;
    let root_end = xml
        .windows(2)
        .rposition(|w| w == b"</")
        .ok_or_else(|| WorkbookError::Malformed(format!("{part} has no closing root tag")))?;

    let mut additions = String::new();
    for anchor in anchors {
        anchor.write_xml(&mut additions, true);
    }

    let mut out = Vec::with_capacity(xml.len() + additions.len());
    out.extend_from_slice(&xml[..root_end]);
    out.extend_from_slice(additions.as_bytes());
    out.extend_from_slice(&xml[root_end..]);
    Ok(out)
}

/// Largest `cNvPr` id used in a drawing part (1 when it has none).
pub fn max_shape_id(xml: &[u8], part: &str) -> Result<u32, WorkbookError> {
    let mut reader = Reader::from_reader(xml);
    let mut max_id = 1;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"cNvPr" {
                    if let Some(id) = attr_value(&e, b"id").and_then(|v| v.parse::<u32>().ok()) {
                        max_id = max_id.max(id);
                    }
                }
            }
            Ok(Event::Eof) => return Ok(max_id),
            Ok(_) => {}
            Err(e) => return Err(WorkbookError::xml(part)(e)),
        }
    }
}
