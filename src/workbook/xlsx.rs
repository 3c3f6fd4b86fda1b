//! XLSX document store.
//!
//! Opens a workbook into memory, queues picture and page-break requests per
//! worksheet and applies them to the package parts when saved:
//! - worksheet XML gets the merged `rowBreaks`/`colBreaks` and a `drawing` ref
//! - the sheet's drawing part is created or extended with one anchor per picture
//! - image bytes land under `xl/media/` with matching content types

use std::path::{Path, PathBuf};

use tracing::{debug, info, trace};

use super::drawing::{
    self, PictureAnchor, DRAWING_CONTENT_TYPE, DRAWING_REL_TYPE, IMAGE_REL_TYPE,
};
use super::package::{attr_value, relative_target, resolve_target, Package, ROOT_RELS_PART};
use super::worksheet::{self, WorksheetEdit};
use super::{DocumentSink, Picture, WorkbookError};
use crate::models::CellRef;

/// A worksheet as listed in the workbook part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetEntry {
    pub name: String,
    /// Package path of the worksheet part.
    pub part: String,
}

#[derive(Debug, Default)]
struct PendingSheet {
    part: String,
    pictures: Vec<(CellRef, Picture)>,
    breaks: Vec<CellRef>,
}

/// An XLSX file opened for in-place modification.
#[derive(Debug)]
pub struct XlsxDocument {
    path: PathBuf,
    package: Package,
    sheets: Vec<SheetEntry>,
    pending: Vec<PendingSheet>,
}

impl XlsxDocument {
    /// Opens a workbook and indexes its worksheets.
    pub fn open(path: &Path) -> Result<Self, WorkbookError> {
        let package = Package::open(path)?;
        let sheets = read_sheet_index(&package)?;

        info!(
            "Opened workbook {:?} with sheets {:?}",
            path,
            sheets.iter().map(|s| s.name.as_str()).collect::<Vec<_>>()
        );

        Ok(Self {
            path: path.to_path_buf(),
            package,
            sheets,
            pending: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub fn sheets(&self) -> &[SheetEntry] {
        &self.sheets
    }

    fn sheet(&self, name: &str) -> Option<&SheetEntry> {
        // Sheet names are unique ignoring case
        self.sheets
            .iter()
            .find(|s| s.name.to_lowercase() == name.to_lowercase())
    }

    fn pending_for(&mut self, sheet: &str) -> Result<&mut PendingSheet, WorkbookError> {
        let part = self
            .sheet(sheet)
            .ok_or_else(|| WorkbookError::UnknownSheet(sheet.to_string()))?
            .part
            .clone();

        let index = match self.pending.iter().position(|p| p.part == part) {
            Some(index) => index,
            None => {
                self.pending.push(PendingSheet {
                    part,
                    ..Default::default()
                });
                self.pending.len() - 1
            }
        };
        Ok(&mut self.pending[index])
    }

    /// Applies one sheet's queued edits to the package parts.
    fn apply_sheet(package: &mut Package, pending: PendingSheet) -> Result<(), WorkbookError> {
        let PendingSheet {
            part,
            pictures,
            breaks,
        } = pending;

        let sheet_xml = package.require(&part)?.to_vec();
        let mut sheet_rels = package.relationships(&part)?;
        let mut new_drawing_rel = None;

        if !pictures.is_empty() {
            let existing = match worksheet::find_drawing_rel_id(&sheet_xml, &part)? {
                Some(rel_id) => {
                    let rel = sheet_rels.by_id(&rel_id).ok_or_else(|| {
                        WorkbookError::Malformed(format!("{part} refers to unknown {rel_id}"))
                    })?;
                    Some(resolve_target(&part, &rel.target))
                }
                None => None,
            };

            let drawing_part = match &existing {
                Some(drawing_part) => drawing_part.clone(),
                None => {
                    let drawing_part = package.unique_name("xl/drawings/drawing", "xml");
                    let rel_id =
                        sheet_rels.add(DRAWING_REL_TYPE, &relative_target(&part, &drawing_part));
                    new_drawing_rel = Some(rel_id);
                    drawing_part
                }
            };

            let existing_xml = match &existing {
                Some(drawing_part) => Some(package.require(drawing_part)?.to_vec()),
                None => None,
            };
            let mut drawing_rels = package.relationships(&drawing_part)?;
            let mut next_shape_id = match &existing_xml {
                Some(xml) => drawing::max_shape_id(xml, &drawing_part)? + 1,
                None => 2,
            };

            let mut anchors = Vec::with_capacity(pictures.len());
            let mut media_types = Vec::new();
            for (cell, picture) in pictures {
                let (width_px, height_px) = picture.footprint();
                let media_part = package.unique_name("xl/media/image", picture.extension.extension);
                let rel_id =
                    drawing_rels.add(IMAGE_REL_TYPE, &relative_target(&drawing_part, &media_part));

                trace!(
                    %cell,
                    media = %media_part,
                    width_px,
                    height_px,
                    "Embedding picture"
                );

                package.set_part(&media_part, picture.bytes);
                media_types.push((picture.extension.extension, picture.extension.content_type));
                anchors.push(PictureAnchor {
                    cell,
                    width_px,
                    height_px,
                    rel_id,
                    shape_id: next_shape_id,
                    description: picture.name,
                });
                next_shape_id += 1;
            }

            let drawing_xml = match &existing_xml {
                Some(xml) => drawing::append_to_drawing(xml, &drawing_part, &anchors)?,
                None => drawing::new_drawing_xml(&anchors),
            };
            package.set_part(&drawing_part, drawing_xml);
            package.set_relationships(&drawing_part, &drawing_rels);

            let overrides: Vec<(&str, &str)> = if existing.is_none() {
                vec![(drawing_part.as_str(), DRAWING_CONTENT_TYPE)]
            } else {
                Vec::new()
            };
            package.ensure_content_types(&media_types, &overrides)?;

            debug!(
                "Placed {} pictures in {} for {}",
                anchors.len(),
                drawing_part,
                part
            );
        }

        let rewritten = worksheet::rewrite_worksheet(
            &sheet_xml,
            &part,
            WorksheetEdit {
                breaks: &breaks,
                drawing_rel_id: new_drawing_rel.as_deref(),
            },
        )?;
        package.set_part(&part, rewritten);
        if new_drawing_rel.is_some() {
            package.set_relationships(&part, &sheet_rels);
        }

        Ok(())
    }
}

impl DocumentSink for XlsxDocument {
    fn has_sheet(&self, sheet: &str) -> bool {
        self.sheet(sheet).is_some()
    }

    fn insert_image(
        &mut self,
        sheet: &str,
        cell: CellRef,
        picture: Picture,
    ) -> Result<(), WorkbookError> {
        if picture.auto_fit {
            return Err(WorkbookError::Malformed(format!(
                "picture {} asks for auto-fit, which one-cell anchors do not support",
                picture.name
            )));
        }
        if picture.bytes.is_empty() {
            return Err(WorkbookError::Malformed(format!(
                "picture {} has no data",
                picture.name
            )));
        }
        self.pending_for(sheet)?.pictures.push((cell, picture));
        Ok(())
    }

    fn insert_page_break(&mut self, sheet: &str, cell: CellRef) -> Result<(), WorkbookError> {
        self.pending_for(sheet)?.breaks.push(cell);
        Ok(())
    }

    fn save(&mut self) -> Result<(), WorkbookError> {
        // Edits land in the in-memory package; the file only changes on rename
        for pending in std::mem::take(&mut self.pending) {
            Self::apply_sheet(&mut self.package, pending)?;
        }
        self.package.save_atomic(&self.path)?;

        info!("Saved workbook {:?}", self.path);
        Ok(())
    }
}

/// Maps sheet names to worksheet parts via the workbook part and its rels.
fn read_sheet_index(package: &Package) -> Result<Vec<SheetEntry>, WorkbookError> {
    let root_rels = package.relationships("")?;
    let workbook_part = root_rels
        .by_type_suffix("/officeDocument")
        .map(|rel| resolve_target("", &rel.target))
        .ok_or_else(|| WorkbookError::MissingPart(format!("officeDocument in {ROOT_RELS_PART}")))?;

    let workbook_xml = package.require(&workbook_part)?;
    let workbook_rels = package.relationships(&workbook_part)?;

    let mut sheets = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(workbook_xml);
    loop {
        match reader.read_event() {
            Ok(quick_xml::events::Event::Start(e)) | Ok(quick_xml::events::Event::Empty(e))
                if e.local_name().as_ref() == b"sheet" =>
            {
                let (Some(name), Some(rel_id)) = (attr_value(&e, b"name"), attr_value(&e, b"id"))
                else {
                    continue;
                };
                let Some(rel) = workbook_rels.by_id(&rel_id) else {
                    return Err(WorkbookError::Malformed(format!(
                        "sheet {name} refers to unknown {rel_id}"
                    )));
                };
                sheets.push(SheetEntry {
                    name,
                    part: resolve_target(&workbook_part, &rel.target),
                });
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(WorkbookError::xml(&workbook_part)(e)),
        }
    }

    Ok(sheets)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::workbook::package::tests::{write_zip, CONTENT_TYPES};
    use crate::workbook::package::CONTENT_TYPES_PART;
    use crate::workbook::ImageExtension;
    use tempfile::tempdir;

    const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

    const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Summary" sheetId="1" r:id="rId1"/><sheet name="Evidence" sheetId="2" r:id="rId2"/></sheets></workbook>"#;

    const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="/xl/worksheets/sheet2.xml"/></Relationships>"#;

    const SHEET: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheetData/><pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/></worksheet>"#;

    /// Writes a two-sheet template (`Summary`, `Evidence`) to `path`.
    pub fn write_template(path: &Path) {
        write_zip(
            path,
            &[
                (CONTENT_TYPES_PART, CONTENT_TYPES),
                ("_rels/.rels", ROOT_RELS),
                ("xl/workbook.xml", WORKBOOK),
                ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
                ("xl/worksheets/sheet1.xml", SHEET),
                ("xl/worksheets/sheet2.xml", SHEET),
            ],
        );
    }

    fn picture(name: &str, extension: ImageExtension) -> Picture {
        Picture {
            name: name.to_string(),
            bytes: vec![1, 2, 3],
            extension,
            width: 1920,
            height: 1080,
            scale_x: 1115.9 / 1920.0,
            scale_y: 609.2 / 1080.0,
            auto_fit: false,
        }
    }

    fn part_str(package: &Package, name: &str) -> String {
        String::from_utf8(package.part(name).unwrap().to_vec()).unwrap()
    }

    #[test]
    fn test_open_indexes_sheets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("template.xlsx");
        write_template(&path);

        let doc = XlsxDocument::open(&path).unwrap();
        assert_eq!(
            doc.sheets(),
            &[
                SheetEntry {
                    name: "Summary".into(),
                    part: "xl/worksheets/sheet1.xml".into()
                },
                SheetEntry {
                    name: "Evidence".into(),
                    part: "xl/worksheets/sheet2.xml".into()
                },
            ]
        );
        assert!(doc.has_sheet("evidence"));
        assert!(!doc.has_sheet("Missing"));
    }

    #[test]
    fn test_open_rejects_non_zip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("template.xlsx");
        std::fs::write(&path, "plain text").unwrap();
        assert!(matches!(XlsxDocument::open(&path), Err(WorkbookError::Zip(_))));
    }

    #[test]
    fn test_unknown_sheet_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("template.xlsx");
        write_template(&path);

        let mut doc = XlsxDocument::open(&path).unwrap();
        let err = doc
            .insert_page_break("Nope", "AM40".parse().unwrap())
            .unwrap_err();
        assert!(matches!(err, WorkbookError::UnknownSheet(name) if name == "Nope"));
    }

    #[test]
    fn test_nothing_is_written_before_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("template.xlsx");
        write_template(&path);
        let before = std::fs::read(&path).unwrap();

        let mut doc = XlsxDocument::open(&path).unwrap();
        doc.insert_image("Evidence", "B4".parse().unwrap(), picture("a.png", ImageExtension::PNG))
            .unwrap();
        doc.insert_page_break("Evidence", "BM40".parse().unwrap())
            .unwrap();
        drop(doc);

        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_save_writes_pictures_breaks_and_content_types() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("template.xlsx");
        write_template(&path);

        let mut doc = XlsxDocument::open(&path).unwrap();
        doc.insert_image("Evidence", "B4".parse().unwrap(), picture("cover.png", ImageExtension::PNG))
            .unwrap();
        doc.insert_image(
            "Evidence",
            "AM4".parse().unwrap(),
            picture(
                "shot1.jpg",
                ImageExtension {
                    extension: "jpg",
                    content_type: "image/jpeg",
                },
            ),
        )
        .unwrap();
        doc.insert_page_break("Evidence", "BY40".parse().unwrap())
            .unwrap();
        doc.save().unwrap();

        let package = Package::open(&path).unwrap();
        assert_eq!(package.part("xl/media/image1.png").unwrap(), &[1, 2, 3]);
        assert_eq!(package.part("xl/media/image1.jpg").unwrap(), &[1, 2, 3]);

        let sheet = part_str(&package, "xl/worksheets/sheet2.xml");
        assert!(sheet.contains(r#"<colBreaks count="1" manualBreakCount="1"><brk id="76" max="1048575" man="1"/></colBreaks>"#));
        assert!(sheet.contains(r#"<drawing xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" r:id="rId1"/>"#));
        // untouched sheet stays as it was
        assert_eq!(part_str(&package, "xl/worksheets/sheet1.xml"), SHEET);

        let sheet_rels = package.relationships("xl/worksheets/sheet2.xml").unwrap();
        assert_eq!(sheet_rels.by_id("rId1").unwrap().target, "../drawings/drawing1.xml");

        let drawing = part_str(&package, "xl/drawings/drawing1.xml");
        assert_eq!(drawing.matches("<xdr:oneCellAnchor").count(), 2);
        assert!(drawing.contains("<xdr:col>38</xdr:col>"));
        assert!(drawing.contains(r#"descr="shot1.jpg""#));

        let drawing_rels = package.relationships("xl/drawings/drawing1.xml").unwrap();
        let targets: Vec<&str> = drawing_rels.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(targets, ["../media/image1.png", "../media/image1.jpg"]);

        let types = part_str(&package, CONTENT_TYPES_PART);
        assert!(types.contains(r#"<Default Extension="png" ContentType="image/png"/>"#));
        assert!(types.contains(r#"<Default Extension="jpg" ContentType="image/jpeg"/>"#));
        assert!(types.contains(r#"<Override PartName="/xl/drawings/drawing1.xml""#));
    }

    #[test]
    fn test_second_run_extends_existing_drawing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("template.xlsx");
        write_template(&path);

        for cell in ["B4", "AM4"] {
            let mut doc = XlsxDocument::open(&path).unwrap();
            doc.insert_image("Evidence", cell.parse().unwrap(), picture("a.png", ImageExtension::PNG))
                .unwrap();
            doc.save().unwrap();
        }

        let package = Package::open(&path).unwrap();
        assert!(!package.contains("xl/drawings/drawing2.xml"));
        assert!(package.contains("xl/media/image2.png"));

        let sheet = part_str(&package, "xl/worksheets/sheet2.xml");
        assert_eq!(sheet.matches("<drawing").count(), 1);

        let drawing = part_str(&package, "xl/drawings/drawing1.xml");
        assert_eq!(drawing.matches("</xdr:oneCellAnchor>").count(), 2);
        assert_eq!(drawing::max_shape_id(drawing.as_bytes(), "d").unwrap(), 3);

        let types = part_str(&package, CONTENT_TYPES_PART);
        assert_eq!(types.matches("/xl/drawings/drawing1.xml").count(), 1);
    }

    #[test]
    fn test_auto_fit_picture_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("template.xlsx");
        write_template(&path);

        let mut doc = XlsxDocument::open(&path).unwrap();
        let fitted = Picture {
            auto_fit: true,
            ..picture("fit.png", ImageExtension::PNG)
        };
        let err = doc
            .insert_image("Evidence", "B4".parse().unwrap(), fitted)
            .unwrap_err();
        assert!(matches!(err, WorkbookError::Malformed(ref msg) if msg.contains("auto-fit")));

        // nothing was queued, so saving adds no drawing
        doc.save().unwrap();
        let package = Package::open(&path).unwrap();
        assert!(!package.contains("xl/drawings/drawing1.xml"));
        assert!(!package.contains("xl/media/image1.png"));
    }

    #[test]
    fn test_repeated_saves_on_one_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("template.xlsx");
        write_template(&path);

        let mut doc = XlsxDocument::open(&path).unwrap();
        doc.insert_image("Evidence", "B4".parse().unwrap(), picture("a.png", ImageExtension::PNG))
            .unwrap();
        doc.save().unwrap();
        doc.insert_image("Evidence", "AM4".parse().unwrap(), picture("b.png", ImageExtension::PNG))
            .unwrap();
        doc.save().unwrap();

        let package = Package::open(&path).unwrap();
        assert!(package.contains("xl/media/image2.png"));
        assert!(!package.contains("xl/drawings/drawing2.xml"));
        let drawing = part_str(&package, "xl/drawings/drawing1.xml");
        assert_eq!(drawing.matches("</xdr:oneCellAnchor>").count(), 2);
        let sheet = part_str(&package, "xl/worksheets/sheet2.xml");
        assert_eq!(sheet.matches("<drawing").count(), 1);
    }
}
