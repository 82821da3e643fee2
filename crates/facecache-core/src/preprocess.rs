//! Image loading and normalization before detection.
//!
//! Every source image goes through the same steps: EXIF orientation fix,
//! conversion to 8-bit RGB, and a downscale when either side exceeds the
//! configured bound. The result is a contiguous `RgbImage`, which is what the
//! detectors and the recognizer expect.

use image::imageops::{self, FilterType};
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader, RgbImage};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Larger side of an image above which it is downscaled.
pub const DEFAULT_MAX_DIMENSION: u32 = 2000;

/// File extensions treated as images (compared case-insensitively).
pub const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tiff", "tif"];

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Whether the path carries one of the supported image extensions.
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

/// Counter-clockwise rotation needed to display an image upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Rotation required by a decoded EXIF orientation.
    ///
    /// Only the pure rotations are honored (EXIF 3, 6 and 8). Mirrored
    /// variants leave the image untouched.
    fn from_orientation(orientation: Orientation) -> Option<Self> {
        match orientation {
            Orientation::Rotate180 => Some(Self::Deg180),
            // EXIF 6: stored rotated, display needs a quarter turn clockwise.
            Orientation::Rotate90 => Some(Self::Deg270),
            // EXIF 8
            Orientation::Rotate270 => Some(Self::Deg90),
            _ => None,
        }
    }
}

/// Rotate counter-clockwise by the given amount.
pub fn apply_rotation(image: &RgbImage, rotation: Rotation) -> RgbImage {
    // imageops rotates clockwise
    match rotation {
        Rotation::Deg90 => imageops::rotate270(image),
        Rotation::Deg180 => imageops::rotate180(image),
        Rotation::Deg270 => imageops::rotate90(image),
    }
}

/// Target dimensions when the larger side is clamped to `bound`.
///
/// Returns the input unchanged when both sides already fit. A zero bound
/// disables downscaling.
pub fn scaled_dimensions(width: u32, height: u32, bound: u32) -> (u32, u32) {
    let larger = width.max(height);
    if bound == 0 || larger <= bound || larger == 0 {
        return (width, height);
    }

    let scale = |side: u32| -> u32 {
        let scaled = (side as f64 * bound as f64 / larger as f64).round() as u32;
        scaled.max(1)
    };

    if width >= height {
        (bound, scale(height))
    } else {
        (scale(width), bound)
    }
}

/// Downscale with Lanczos3 so that neither side exceeds `bound`.
pub fn downscale_to_bound(image: RgbImage, bound: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let (new_w, new_h) = scaled_dimensions(width, height, bound);
    if (new_w, new_h) == (width, height) {
        return image;
    }

    tracing::debug!(width, height, new_w, new_h, "downscaling image");
    imageops::resize(&image, new_w, new_h, FilterType::Lanczos3)
}

/// Convert to 8-bit RGB unless the image already is.
pub fn to_rgb(image: DynamicImage) -> RgbImage {
    match image {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other => {
            tracing::debug!(color = ?other.color(), "converting image to RGB8");
            other.to_rgb8()
        }
    }
}

/// Load an image from disk and normalize it for detection.
///
/// Orientation metadata that cannot be read is logged and ignored; decode
/// failures are returned.
pub fn load_image(path: &Path, max_dimension: u32) -> Result<RgbImage, PreprocessError> {
    let reader = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|source| PreprocessError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    let mut decoder = reader.into_decoder()?;
    let rotation = match decoder.orientation() {
        Ok(orientation) => Rotation::from_orientation(orientation),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not read orientation; using image as stored");
            None
        }
    };

    let decoded = DynamicImage::from_decoder(decoder)?;
    let mut rgb = to_rgb(decoded);

    if let Some(rotation) = rotation {
        tracing::debug!(path = %path.display(), ?rotation, "applying EXIF orientation");
        rgb = apply_rotation(&rgb, rotation);
    }

    Ok(downscale_to_bound(rgb, max_dimension))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    #[test]
    fn test_is_image_file_allow_list() {
        for name in ["a.png", "a.jpg", "a.jpeg", "a.bmp", "a.tiff", "a.tif"] {
            assert!(is_image_file(Path::new(name)), "{name}");
        }
    }

    #[test]
    fn test_is_image_file_case_insensitive() {
        assert!(is_image_file(Path::new("IMG_0001.JPG")));
        assert!(is_image_file(Path::new("scan.TiF")));
    }

    #[test]
    fn test_is_image_file_rejects_others() {
        assert!(!is_image_file(Path::new("notes.txt")));
        assert!(!is_image_file(Path::new("photo.webp")));
        assert!(!is_image_file(Path::new("jpg")));
        assert!(!is_image_file(Path::new(".DS_Store")));
    }

    #[test]
    fn test_rotation_from_orientation() {
        assert_eq!(Rotation::from_orientation(Orientation::Rotate90), Some(Rotation::Deg270));
        assert_eq!(Rotation::from_orientation(Orientation::Rotate180), Some(Rotation::Deg180));
        assert_eq!(Rotation::from_orientation(Orientation::Rotate270), Some(Rotation::Deg90));
        assert_eq!(Rotation::from_orientation(Orientation::NoTransforms), None);
        assert_eq!(Rotation::from_orientation(Orientation::FlipHorizontal), None);
        assert_eq!(Rotation::from_orientation(Orientation::Rotate90FlipH), None);
    }

    /// 2x1 image: red on the left, blue on the right.
    fn two_pixel_row() -> RgbImage {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 0, 255]));
        img
    }

    #[test]
    fn test_apply_rotation_270_ccw() {
        // 270° counter-clockwise == 90° clockwise: left pixel ends on top.
        let rotated = apply_rotation(&two_pixel_row(), Rotation::Deg270);
        assert_eq!(rotated.dimensions(), (1, 2));
        assert_eq!(rotated.get_pixel(0, 0), &Rgb([255, 0, 0]));
        assert_eq!(rotated.get_pixel(0, 1), &Rgb([0, 0, 255]));
    }

    #[test]
    fn test_apply_rotation_90_ccw() {
        // Left pixel ends at the bottom.
        let rotated = apply_rotation(&two_pixel_row(), Rotation::Deg90);
        assert_eq!(rotated.dimensions(), (1, 2));
        assert_eq!(rotated.get_pixel(0, 0), &Rgb([0, 0, 255]));
        assert_eq!(rotated.get_pixel(0, 1), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_apply_rotation_180() {
        let rotated = apply_rotation(&two_pixel_row(), Rotation::Deg180);
        assert_eq!(rotated.dimensions(), (2, 1));
        assert_eq!(rotated.get_pixel(0, 0), &Rgb([0, 0, 255]));
    }

    #[test]
    fn test_scaled_dimensions_landscape() {
        assert_eq!(scaled_dimensions(4000, 2000, 2000), (2000, 1000));
    }

    #[test]
    fn test_scaled_dimensions_portrait_rounds() {
        // 1333 * 2000 / 3000 = 888.67
        assert_eq!(scaled_dimensions(1333, 3000, 2000), (889, 2000));
    }

    #[test]
    fn test_scaled_dimensions_zero_bound_is_noop() {
        assert_eq!(scaled_dimensions(40, 20, 0), (40, 20));
        assert_eq!(downscale_to_bound(RgbImage::new(40, 20), 0).dimensions(), (40, 20));
    }

    #[test]
    fn test_scaled_dimensions_within_bound() {
        assert_eq!(scaled_dimensions(2000, 1500, 2000), (2000, 1500));
        assert_eq!(scaled_dimensions(640, 480, 2000), (640, 480));
    }

    #[test]
    fn test_downscale_to_bound() {
        let img = RgbImage::new(400, 200);
        let out = downscale_to_bound(img, 200);
        assert_eq!(out.dimensions(), (200, 100));
    }

    #[test]
    fn test_to_rgb_converts_other_modes() {
        let gray = DynamicImage::new_luma8(4, 3);
        let rgb = to_rgb(gray);
        assert_eq!(rgb.dimensions(), (4, 3));
        assert_eq!(rgb.as_raw().len(), 4 * 3 * 3);

        let rgba = DynamicImage::new_rgba8(2, 2);
        assert_eq!(to_rgb(rgba).as_raw().len(), 2 * 2 * 3);
    }

    #[test]
    fn test_load_image_downscales_large_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.png");
        RgbImage::new(300, 150).save(&path).unwrap();

        let img = load_image(&path, 100).unwrap();
        assert_eq!(img.dimensions(), (100, 50));
    }

    #[test]
    fn test_load_image_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        assert!(load_image(&path, DEFAULT_MAX_DIMENSION).is_err());
    }

    #[test]
    fn test_load_image_missing_file() {
        let err = load_image(Path::new("/nonexistent/face.png"), DEFAULT_MAX_DIMENSION)
            .unwrap_err();
        assert!(matches!(err, PreprocessError::Io { .. }));
    }

    /// APP1 segment holding a little-endian TIFF IFD with Orientation = `value`.
    fn exif_app1(value: u8) -> Vec<u8> {
        let mut payload = b"Exif\0\0".to_vec();
        payload.extend_from_slice(&[0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00]);
        payload.extend_from_slice(&[0x01, 0x00]); // one entry
        payload.extend_from_slice(&[0x12, 0x01, 0x03, 0x00, 0x01, 0x00, 0x00, 0x00]);
        payload.extend_from_slice(&[value, 0x00, 0x00, 0x00]);
        payload.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // no next IFD

        let len = (payload.len() + 2) as u16;
        let mut segment = vec![0xFF, 0xE1];
        segment.extend_from_slice(&len.to_be_bytes());
        segment.extend_from_slice(&payload);
        segment
    }

    #[test]
    fn test_load_image_applies_exif_orientation_6() {
        let mut jpeg = Vec::new();
        RgbImage::from_pixel(64, 32, Rgb([120, 120, 120]))
            .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .unwrap();
        // Splice the EXIF segment right after SOI.
        let mut tagged = jpeg[..2].to_vec();
        tagged.extend(exif_app1(6));
        tagged.extend_from_slice(&jpeg[2..]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rotated.jpg");
        std::fs::write(&path, tagged).unwrap();

        let img = load_image(&path, DEFAULT_MAX_DIMENSION).unwrap();
        assert_eq!(img.dimensions(), (32, 64));
    }
}
