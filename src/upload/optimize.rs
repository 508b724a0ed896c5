use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;

use crate::config::UploadConfig;
use crate::upload::UploadError;

/// Size and quality targets for one ingestion.
#[derive(Debug, Clone, Copy)]
pub struct OptimizeSettings {
    pub max_dimension: u32,
    pub medium_dimension: u32,
    pub thumbnail_dimension: u32,
    pub jpeg_quality: u8,
}

impl From<&UploadConfig> for OptimizeSettings {
    fn from(config: &UploadConfig) -> Self {
        Self {
            max_dimension: config.max_dimension,
            medium_dimension: config.medium_dimension,
            thumbnail_dimension: config.thumbnail_dimension,
            jpeg_quality: config.jpeg_quality,
        }
    }
}

/// The three stored sizes of a photo, all JPEG.
#[derive(Debug, Clone)]
pub struct Renditions {
    pub original: Vec<u8>,
    pub medium: Vec<u8>,
    pub thumbnail: Vec<u8>,
    /// Dimensions of `original`.
    pub width: u32,
    pub height: u32,
    /// The uploaded bytes were stored unchanged.
    pub kept_original: bool,
}

fn detect_format(bytes: &[u8]) -> Result<ImageFormat, UploadError> {
    match image::guess_format(bytes) {
        Ok(format @ (ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP)) => Ok(format),
        _ => Err(UploadError::UnsupportedFormat),
    }
}

fn decode(bytes: &[u8], format: ImageFormat) -> Result<DynamicImage, UploadError> {
    image::load_from_memory_with_format(bytes, format).map_err(|e| {
        tracing::debug!("Failed to decode {:?} upload: {}", format, e);
        UploadError::Unreadable
    })
}

/// Shrink so the longest edge is at most `max`. Smaller images are returned
/// as-is.
fn fit_within(img: &DynamicImage, max: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    if width <= max && height <= max {
        img.clone()
    } else {
        img.resize(max, max, FilterType::Lanczos3)
    }
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, UploadError> {
    // The JPEG encoder has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buffer = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    rgb.write_with_encoder(encoder)
        .map_err(|e| UploadError::Processing(e.to_string()))?;
    Ok(buffer.into_inner())
}

/// Decode an upload, bound its size, and derive medium and thumbnail
/// renditions. CPU-bound; call from `spawn_blocking`.
pub fn process_photo(bytes: &[u8], settings: OptimizeSettings) -> Result<Renditions, UploadError> {
    let format = detect_format(bytes)?;
    let img = decode(bytes, format)?;
    let (source_width, source_height) = img.dimensions();

    let bounded = fit_within(&img, settings.max_dimension);
    let (width, height) = bounded.dimensions();
    let reencoded = encode_jpeg(&bounded, settings.jpeg_quality)?;

    let within_bounds = width == source_width && height == source_height;
    let keep_original =
        format == ImageFormat::Jpeg && within_bounds && reencoded.len() >= bytes.len();
    let original = if keep_original {
        bytes.to_vec()
    } else {
        reencoded
    };

    let medium = encode_jpeg(
        &fit_within(&bounded, settings.medium_dimension),
        settings.jpeg_quality,
    )?;
    let thumbnail = encode_jpeg(
        &fit_within(&bounded, settings.thumbnail_dimension),
        settings.jpeg_quality,
    )?;

    tracing::debug!(
        "Optimized {:?} {}x{} ({} bytes) -> {}x{} ({} bytes{})",
        format,
        source_width,
        source_height,
        bytes.len(),
        width,
        height,
        original.len(),
        if keep_original { ", original kept" } else { "" }
    );

    Ok(Renditions {
        original,
        medium,
        thumbnail,
        width,
        height,
        kept_original: keep_original,
    })
}

/// Re-encode an event cover as WebP with its longest edge at most `max`.
pub fn process_cover(bytes: &[u8], max: u32) -> Result<Vec<u8>, UploadError> {
    let format = detect_format(bytes)?;
    let img = decode(bytes, format)?;
    let bounded = DynamicImage::ImageRgba8(fit_within(&img, max).to_rgba8());

    let mut buffer = Cursor::new(Vec::new());
    bounded
        .write_to(&mut buffer, ImageFormat::WebP)
        .map_err(|e| UploadError::Processing(e.to_string()))?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn settings() -> OptimizeSettings {
        OptimizeSettings {
            max_dimension: 200,
            medium_dimension: 100,
            thumbnail_dimension: 40,
            jpeg_quality: 80,
        }
    }

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        }))
    }

    fn encoded(img: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, format).unwrap();
        buffer.into_inner()
    }

    fn jpeg_at(img: &DynamicImage, quality: u8) -> Vec<u8> {
        encode_jpeg(img, quality).unwrap()
    }

    fn dims(bytes: &[u8]) -> (u32, u32) {
        image::load_from_memory(bytes).unwrap().dimensions()
    }

    #[test]
    fn large_image_is_bounded_preserving_aspect_ratio() {
        let png = encoded(&gradient(800, 400), ImageFormat::Png);
        let out = process_photo(&png, settings()).unwrap();

        assert_eq!((out.width, out.height), (200, 100));
        assert_eq!(dims(&out.original), (200, 100));
        assert_eq!(dims(&out.medium), (100, 50));
        assert_eq!(dims(&out.thumbnail), (40, 20));
        assert!(!out.kept_original);
        assert_eq!(image::guess_format(&out.original).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn small_image_is_never_upscaled() {
        let png = encoded(&gradient(30, 20), ImageFormat::Png);
        let out = process_photo(&png, settings()).unwrap();

        assert_eq!((out.width, out.height), (30, 20));
        assert_eq!(dims(&out.medium), (30, 20));
        assert_eq!(dims(&out.thumbnail), (30, 20));
    }

    #[test]
    fn compact_jpeg_within_bounds_is_kept_verbatim() {
        // Already encoded at a lower quality than the target, so re-encoding
        // cannot win.
        let jpeg = jpeg_at(&gradient(120, 80), 30);
        let out = process_photo(&jpeg, settings()).unwrap();

        assert!(out.kept_original);
        assert_eq!(out.original, jpeg);
    }

    #[test]
    fn oversized_jpeg_is_reencoded() {
        let jpeg = jpeg_at(&gradient(600, 300), 95);
        let out = process_photo(&jpeg, settings()).unwrap();

        assert!(!out.kept_original);
        assert_eq!(dims(&out.original), (200, 100));
    }

    #[test]
    fn non_image_bytes_are_unsupported() {
        let err = process_photo(b"definitely not a photo", settings()).unwrap_err();
        assert!(matches!(err, UploadError::UnsupportedFormat));
    }

    #[test]
    fn truncated_jpeg_is_unreadable() {
        let jpeg = jpeg_at(&gradient(120, 80), 80);
        let err = process_photo(&jpeg[..64], settings()).unwrap_err();
        assert!(matches!(err, UploadError::Unreadable));
    }

    #[test]
    fn cover_is_webp_and_bounded() {
        let png = encoded(&gradient(500, 250), ImageFormat::Png);
        let cover = process_cover(&png, 100).unwrap();

        assert_eq!(image::guess_format(&cover).unwrap(), ImageFormat::WebP);
        assert_eq!(dims(&cover), (100, 50));
    }
}
