// Image canonicalization
//
// Decodes source bytes, bakes EXIF orientation in, downsizes for the selected
// output policy and encodes the result as JPEG.

use crate::pipeline::types::RenderError;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader, RgbImage};
use serde::Deserialize;
use std::io::Cursor;

pub const FULL_QUALITY: u8 = 95;
pub const PDF_MAX_EDGE: u32 = 1800;
pub const PDF_QUALITY: u8 = 88;
pub const PDF_COMPACT_MAX_EDGE: u32 = 800;
pub const PDF_COMPACT_QUALITY: u8 = 55;
pub const THUMBNAIL_MAX_EDGE: u32 = 400;
pub const THUMBNAIL_QUALITY: u8 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Original resolution.
    Full,
    /// Capped for embedding in PDF reports.
    #[default]
    Pdf,
    Thumbnail,
}

/// Render parameters as callers send them: `{mode, maxEdge?, quality?, compact?}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    #[serde(default)]
    pub mode: RenderMode,
    #[serde(default)]
    pub max_edge: Option<u32>,
    #[serde(default)]
    pub quality: Option<u8>,
    /// Smaller pdf variant for documents embedding many photos.
    #[serde(default)]
    pub compact: bool,
}

impl RenderOptions {
    pub fn full() -> Self {
        Self {
            mode: RenderMode::Full,
            ..Self::default()
        }
    }

    pub fn pdf() -> Self {
        Self::default()
    }

    pub fn thumbnail() -> Self {
        Self {
            mode: RenderMode::Thumbnail,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> OutputPolicy {
        let (max_edge, quality) = match (self.mode, self.compact) {
            (RenderMode::Full, _) => (None, FULL_QUALITY),
            (RenderMode::Pdf, false) => (Some(PDF_MAX_EDGE), PDF_QUALITY),
            (RenderMode::Pdf, true) => (Some(PDF_COMPACT_MAX_EDGE), PDF_COMPACT_QUALITY),
            (RenderMode::Thumbnail, _) => (Some(THUMBNAIL_MAX_EDGE), THUMBNAIL_QUALITY),
        };
        OutputPolicy {
            max_edge: self.max_edge.filter(|e| *e > 0).or(max_edge),
            quality: self.quality.map(|q| q.clamp(1, 100)).unwrap_or(quality),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputPolicy {
    pub max_edge: Option<u32>,
    pub quality: u8,
}

/// An upright raster together with its full-resolution size.
pub struct UprightImage {
    pub image: RgbImage,
    /// Size after orientation, before any resizing.
    pub natural_width: u32,
    pub natural_height: u32,
}

pub fn swaps_dimensions(orientation: Orientation) -> bool {
    matches!(
        orientation,
        Orientation::Rotate90
            | Orientation::Rotate270
            | Orientation::Rotate90FlipH
            | Orientation::Rotate270FlipH
    )
}

/// Size that fits within `max_edge` on the longer side, never upscaling.
pub fn fit_within(width: u32, height: u32, max_edge: Option<u32>) -> (u32, u32) {
    let Some(max_edge) = max_edge else {
        return (width, height);
    };
    let longest = width.max(height);
    if longest <= max_edge || longest == 0 {
        return (width, height);
    }
    let scale = max_edge as f64 / longest as f64;
    let w = ((width as f64 * scale).round() as u32).max(1);
    let h = ((height as f64 * scale).round() as u32).max(1);
    (w, h)
}

/// Upright target size from the stored (pre-orientation) size.
pub fn target_dimensions(
    stored_width: u32,
    stored_height: u32,
    orientation: Orientation,
    max_edge: Option<u32>,
) -> (u32, u32) {
    let (w, h) = if swaps_dimensions(orientation) {
        (stored_height, stored_width)
    } else {
        (stored_width, stored_height)
    };
    fit_within(w, h, max_edge)
}

/// Decodes `bytes`, applies EXIF orientation and resizes to the policy's edge cap.
pub fn decode_upright(bytes: &[u8], max_edge: Option<u32>) -> Result<UprightImage, RenderError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?;
    let mut decoder = reader.into_decoder()?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let (stored_w, stored_h) = decoder.dimensions();

    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);

    let (natural_width, natural_height) = (image.width(), image.height());
    let (target_w, target_h) = target_dimensions(stored_w, stored_h, orientation, max_edge);
    if (target_w, target_h) != (natural_width, natural_height) {
        image = image.resize_exact(target_w, target_h, FilterType::Lanczos3);
    }

    Ok(UprightImage {
        image: image.to_rgb8(),
        natural_width,
        natural_height,
    })
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, RenderError> {
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder.encode_image(image)?;
    Ok(buf)
}

/// Clean (unannotated) output: upright, resized and re-encoded.
pub fn canonicalize(bytes: &[u8], options: &RenderOptions) -> Result<Vec<u8>, RenderError> {
    let policy = options.policy();
    let upright = decode_upright(bytes, policy.max_edge)?;
    encode_jpeg(&upright.image, policy.quality)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::Rgb;

    pub(crate) fn jpeg_fixture(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, 128])
        });
        encode_jpeg(&img, 90).unwrap()
    }

    #[test]
    fn test_policy_defaults() {
        assert_eq!(
            RenderOptions::full().policy(),
            OutputPolicy { max_edge: None, quality: 95 }
        );
        assert_eq!(
            RenderOptions::pdf().policy(),
            OutputPolicy { max_edge: Some(1800), quality: 88 }
        );
        let compact = RenderOptions { compact: true, ..RenderOptions::pdf() };
        assert_eq!(compact.policy(), OutputPolicy { max_edge: Some(800), quality: 55 });
        assert_eq!(
            RenderOptions::thumbnail().policy(),
            OutputPolicy { max_edge: Some(400), quality: 80 }
        );
        let custom = RenderOptions { max_edge: Some(1200), quality: Some(70), ..RenderOptions::pdf() };
        assert_eq!(custom.policy(), OutputPolicy { max_edge: Some(1200), quality: 70 });
    }

    #[test]
    fn test_options_from_wire_json() {
        let opts: RenderOptions =
            serde_json::from_str(r#"{"mode":"full","quality":90}"#).unwrap();
        assert_eq!(opts.mode, RenderMode::Full);
        assert_eq!(opts.policy().quality, 90);
        let defaults: RenderOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(defaults.mode, RenderMode::Pdf);
    }

    #[test]
    fn test_orientation_swaps() {
        // EXIF tags 5 through 8 transpose the image.
        let swapping: Vec<u8> = (1..=8)
            .filter(|t| Orientation::from_exif(*t).is_some_and(swaps_dimensions))
            .collect();
        assert_eq!(swapping, vec![5, 6, 7, 8]);
        assert_eq!(
            target_dimensions(4000, 3000, Orientation::Rotate90, Some(1800)),
            (1350, 1800)
        );
        assert_eq!(
            target_dimensions(4000, 3000, Orientation::NoTransforms, Some(1800)),
            (1800, 1350)
        );
    }

    /// Splices an APP1 segment holding a single Orientation entry after SOI.
    fn with_exif_orientation(jpeg: &[u8], tag: u8) -> Vec<u8> {
        let mut payload = b"Exif\0\0".to_vec();
        payload.extend_from_slice(&[
            b'M', b'M', 0x00, 0x2A, 0, 0, 0, 8, // big-endian TIFF header, IFD at 8
            0, 1, // one entry
            0x01, 0x12, 0, 3, 0, 0, 0, 1, 0, tag, 0, 0, // Orientation, SHORT, 1 value
            0, 0, 0, 0, // no next IFD
        ]);
        let len = (payload.len() + 2) as u16;

        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    #[test]
    fn test_exif_orientation_is_baked_in() {
        let rotated = with_exif_orientation(&jpeg_fixture(40, 20), 6);
        let upright = decode_upright(&rotated, None).unwrap();
        assert_eq!((upright.natural_width, upright.natural_height), (20, 40));
        assert_eq!(upright.image.dimensions(), (20, 40));

        let out = canonicalize(&rotated, &RenderOptions::full()).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (20, 40));

        let plain = decode_upright(&with_exif_orientation(&jpeg_fixture(40, 20), 1), None).unwrap();
        assert_eq!(plain.image.dimensions(), (40, 20));
    }

    #[test]
    fn test_fit_within_never_upscales() {
        assert_eq!(fit_within(300, 200, Some(400)), (300, 200));
        assert_eq!(fit_within(800, 200, Some(400)), (400, 100));
        assert_eq!(fit_within(800, 200, None), (800, 200));
    }

    #[test]
    fn test_canonicalize_resizes() {
        let bytes = jpeg_fixture(900, 600);
        let out = canonicalize(&bytes, &RenderOptions::thumbnail()).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (400, 267));
    }

    #[test]
    fn test_corrupt_bytes_are_an_error() {
        assert!(canonicalize(b"definitely not an image", &RenderOptions::full()).is_err());
    }
}
