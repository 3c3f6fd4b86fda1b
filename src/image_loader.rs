use std::io::Cursor;

use image::error::{
    ImageFormatHint, LimitError, LimitErrorKind, UnsupportedError, UnsupportedErrorKind,
};
use image::{ImageError, ImageFormat, ImageReader};
use tracing::trace;

use crate::error::{Result, ShotSheetError};
use crate::models::ImageRef;

/// A fully decoded evidence image: its bytes, sniffed format and pixel size.
#[derive(Debug, Clone)]
pub struct ProbedImage {
    pub image: ImageRef,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

/// Reads an image and decodes it completely.
///
/// The format is sniffed from content, not from the extension. A full decode
/// (rather than a header read) catches files truncated or corrupted past the
/// header before the workbook is touched.
pub fn probe_image(image: &ImageRef) -> Result<ProbedImage> {
    let decode_err = |source: ImageError| ShotSheetError::ImageDecode {
        path: image.path().to_path_buf(),
        source,
    };

    let bytes = std::fs::read(image.path()).map_err(|e| decode_err(ImageError::IoError(e)))?;

    let reader = ImageReader::new(Cursor::new(bytes.as_slice()))
        .with_guessed_format()
        .map_err(|e| decode_err(ImageError::IoError(e)))?;
    let format = reader.format().ok_or_else(|| {
        decode_err(ImageError::Unsupported(UnsupportedError::from_format_and_kind(
            ImageFormatHint::Unknown,
            UnsupportedErrorKind::Format(ImageFormatHint::Unknown),
        )))
    })?;

    let decoded = reader.decode().map_err(decode_err)?;
    let (width, height) = (decoded.width(), decoded.height());

    if width == 0 || height == 0 {
        return Err(decode_err(ImageError::Limits(LimitError::from_kind(
            LimitErrorKind::DimensionError,
        ))));
    }

    trace!("Got dimensions {}x{} ({:?}) for {}", width, height, format, image);

    Ok(ProbedImage {
        image: image.clone(),
        format,
        width,
        height,
        bytes,
    })
}
