use std::path::PathBuf;

use tracing::info;

use crate::cli::RunOptions;
use crate::error::{Result, ShotSheetError};
use crate::image_loader::{probe_image, ProbedImage};
use crate::layout::{PlacementPlan, PlacementSummary};
use crate::scanner::FileScanner;
use crate::workbook::{DocumentSink, WorkbookError, XlsxDocument};

/// What a successful run did.
#[derive(Debug)]
pub enum RunOutcome {
    /// The workbook was updated and saved in place.
    Saved {
        path: PathBuf,
        summary: PlacementSummary,
    },
    /// Nothing was opened or written; the plan is returned for display.
    DryRun { plan: PlacementPlan },
}

/// One run of the pipeline: scan, decode, plan, place, save.
pub struct ShotSheetApp {
    options: RunOptions,
}

impl ShotSheetApp {
    pub fn new(options: RunOptions) -> Self {
        Self { options }
    }

    pub fn run(&self) -> Result<RunOutcome> {
        let options = &self.options;

        info!("Scanning {:?}", options.folder);
        let images = FileScanner::with_config(options.scan.clone()).scan(&options.folder)?;

        // Every image is decoded before the workbook is opened
        let probed = images
            .iter()
            .map(probe_image)
            .collect::<Result<Vec<ProbedImage>>>()?;
        info!("Decoded {} images", probed.len());

        let plan = PlacementPlan::compute(&options.placement, probed).map_err(|e| {
            ShotSheetError::document("failed to compute placement", WorkbookError::Cell(e))
        })?;

        if options.dry_run {
            return Ok(RunOutcome::DryRun { plan });
        }

        let mut document = XlsxDocument::open(&options.excel)
            .map_err(|e| ShotSheetError::document("Failed to open template file", e))?;
        let summary = place(&mut document, &options.sheet, plan)?;

        Ok(RunOutcome::Saved {
            path: document.path().to_path_buf(),
            summary,
        })
    }
}

/// Applies `plan` to `sheet` and saves. Nothing is saved if any step fails.
fn place<S: DocumentSink>(sink: &mut S, sheet: &str, plan: PlacementPlan) -> Result<PlacementSummary> {
    if !sink.has_sheet(sheet) {
        return Err(ShotSheetError::document(
            "Error inserting images",
            WorkbookError::UnknownSheet(sheet.to_string()),
        ));
    }

    let summary = plan.apply(sink, sheet)?;

    sink.save()
        .map_err(|e| ShotSheetError::document("Failed to save updated file", e))?;
    info!("Saved workbook");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::placement::tests::{Call, RecordingSink};
    use crate::layout::{ExtensionTag, PlacementConfig};
    use crate::scanner::ScanConfig;
    use crate::workbook::package::Package;
    use crate::workbook::xlsx::tests::write_template;
    use image::{Rgb, RgbImage};
    use std::fs;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        dir: TempDir,
        folder: PathBuf,
        excel: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let folder = dir.path().join("shots");
            fs::create_dir(&folder).unwrap();
            let excel = dir.path().join("report.xlsx");
            write_template(&excel);
            Self { dir, folder, excel }
        }

        fn add_png(&self, name: &str, width: u32, height: u32) {
            RgbImage::from_pixel(width, height, Rgb([200, 10, 10]))
                .save(self.folder.join(name))
                .unwrap();
        }

        fn add_jpeg_named(&self, name: &str) {
            let path = self.dir.path().join("tmp.jpg");
            RgbImage::from_pixel(16, 9, Rgb([0, 0, 255])).save(&path).unwrap();
            fs::rename(&path, self.folder.join(name)).unwrap();
        }

        fn options(&self, sheet: &str) -> RunOptions {
            RunOptions {
                folder: self.folder.clone(),
                sheet: sheet.to_string(),
                excel: self.excel.clone(),
                scan: ScanConfig::default(),
                placement: PlacementConfig::default(),
                dry_run: false,
            }
        }
    }

    fn read_part(path: &Path, name: &str) -> String {
        let package = Package::open(path).unwrap();
        String::from_utf8(package.part(name).unwrap().to_vec()).unwrap()
    }

    #[test]
    fn test_run_places_images_and_saves() {
        let fx = Fixture::new();
        fx.add_png("cover.png", 40, 30);
        fx.add_png("step2.png", 80, 60);
        fx.add_png("step10.png", 20, 10);

        let outcome = ShotSheetApp::new(fx.options("Evidence")).run().unwrap();
        let RunOutcome::Saved { path, summary } = outcome else {
            panic!("expected a saved run");
        };
        assert_eq!(path, fx.excel);
        assert_eq!(summary.images, 3);
        assert_eq!(summary.page_breaks, 2);

        let drawing = read_part(&fx.excel, "xl/drawings/drawing1.xml");
        assert_eq!(drawing.matches("</xdr:oneCellAnchor>").count(), 3);
        // cover first, then step10 before step2
        let descr: Vec<&str> = drawing
            .split("descr=\"")
            .skip(1)
            .map(|s| s.split('"').next().unwrap())
            .collect();
        assert_eq!(descr, ["cover.png", "step10.png", "step2.png"]);

        let sheet = read_part(&fx.excel, "xl/worksheets/sheet2.xml");
        assert!(sheet.contains("<rowBreaks"));
        assert!(sheet.contains("<colBreaks"));
        assert!(sheet.contains("<drawing"));
    }

    #[test]
    fn test_run_with_empty_folder_saves_without_pictures() {
        let fx = Fixture::new();
        let RunOutcome::Saved { summary, .. } = ShotSheetApp::new(fx.options("Evidence")).run().unwrap()
        else {
            panic!("expected a saved run");
        };
        assert_eq!(summary, PlacementSummary::default());

        let package = Package::open(&fx.excel).unwrap();
        assert!(!package.contains("xl/drawings/drawing1.xml"));
    }

    #[test]
    fn test_detected_and_legacy_extension_tags() {
        let fx = Fixture::new();
        fx.add_jpeg_named("photo1.png");

        ShotSheetApp::new(fx.options("Evidence")).run().unwrap();
        let package = Package::open(&fx.excel).unwrap();
        assert!(package.contains("xl/media/image1.jpg"));

        let fx = Fixture::new();
        fx.add_jpeg_named("photo1.png");
        let mut options = fx.options("Evidence");
        options.placement.extension_tag = ExtensionTag::LegacyPng;

        ShotSheetApp::new(options).run().unwrap();
        let package = Package::open(&fx.excel).unwrap();
        assert!(package.contains("xl/media/image1.png"));
    }

    #[test]
    fn test_corrupt_image_leaves_template_untouched() {
        let fx = Fixture::new();
        fx.add_png("a1.png", 10, 10);
        fs::write(fx.folder.join("a2.png"), b"not really a png").unwrap();
        fx.add_png("a3.png", 10, 10);
        let before = fs::read(&fx.excel).unwrap();

        let err = ShotSheetApp::new(fx.options("Evidence")).run().unwrap_err();
        assert!(matches!(err, ShotSheetError::ImageDecode { ref path, .. } if path.ends_with("a2.png")));
        assert_eq!(fs::read(&fx.excel).unwrap(), before);
    }

    #[test]
    fn test_unknown_sheet_leaves_template_untouched() {
        let fx = Fixture::new();
        fx.add_png("a1.png", 10, 10);
        let before = fs::read(&fx.excel).unwrap();

        let err = ShotSheetApp::new(fx.options("Missing")).run().unwrap_err();
        assert!(matches!(
            err,
            ShotSheetError::DocumentWrite {
                source: WorkbookError::UnknownSheet(_),
                ..
            }
        ));
        assert_eq!(fs::read(&fx.excel).unwrap(), before);
    }

    #[cfg(unix)]
    #[test]
    fn test_unwalkable_folder_is_a_filesystem_error() {
        let fx = Fixture::new();
        let file = fx.dir.path().join("plain.txt");
        fs::write(&file, b"x").unwrap();
        let before = fs::read(&fx.excel).unwrap();
        let mut options = fx.options("Evidence");
        options.folder = file.join("shots");

        let err = ShotSheetApp::new(options).run().unwrap_err();
        assert!(matches!(err, ShotSheetError::Filesystem { .. }));
        assert_eq!(fs::read(&fx.excel).unwrap(), before);
    }

    #[test]
    fn test_missing_template_is_a_document_error() {
        let fx = Fixture::new();
        fs::remove_file(&fx.excel).unwrap();

        let err = ShotSheetApp::new(fx.options("Evidence")).run().unwrap_err();
        assert!(matches!(err, ShotSheetError::DocumentWrite { .. }));
        assert!(err.to_string().starts_with("Failed to open template file"));
    }

    #[test]
    fn test_dry_run_does_not_open_workbook() {
        let fx = Fixture::new();
        fx.add_png("a1.png", 10, 10);
        fx.add_png("a2.png", 10, 10);
        fs::write(&fx.excel, b"not a workbook").unwrap();
        let mut options = fx.options("Evidence");
        options.dry_run = true;

        let RunOutcome::DryRun { plan } = ShotSheetApp::new(options).run().unwrap() else {
            panic!("expected a dry run");
        };
        let cells: Vec<String> = plan.steps.iter().map(|s| s.cell.to_string()).collect();
        assert_eq!(cells, ["B4", "AM4"]);
        assert_eq!(fs::read(&fx.excel).unwrap(), b"not a workbook");
    }

    #[test]
    fn test_place_checks_sheet_then_saves_last() {
        let plan = PlacementPlan::default();
        let mut sink = RecordingSink::default();
        place(&mut sink, "Evidence", plan).unwrap();
        assert_eq!(sink.calls, [Call::Save]);

        let mut sink = RecordingSink::default();
        assert!(place(&mut sink, "Other", PlacementPlan::default()).is_err());
        assert!(sink.calls.is_empty());
    }

    #[test]
    fn test_repeat_runs_place_identically() {
        let first = Fixture::new();
        let second = Fixture::new();
        for fx in [&first, &second] {
            fx.add_png("b.png", 30, 20);
            fx.add_png("a7.png", 50, 25);
            ShotSheetApp::new(fx.options("Evidence")).run().unwrap();
        }
        assert_eq!(
            read_part(&first.excel, "xl/drawings/drawing1.xml"),
            read_part(&second.excel, "xl/drawings/drawing1.xml")
        );
    }
}
