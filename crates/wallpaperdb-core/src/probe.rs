//! Content probe.
//!
//! Detects the actual MIME type from the file bytes (never from the filename
//! or the declared header), extracts image dimensions, and refuses
//! decompression bombs via decoder limits. Video payloads are not decodable
//! here and surface as `InvalidFormat`.

use std::io::Cursor;

use image::error::ImageError;
use image::{GenericImageView, ImageFormat, ImageReader, Limits};

use crate::error::AppError;
use crate::models::wallpaper::aspect_ratio;
use crate::models::FileType;

/// Backstop decode caps. The validation policy applies the (tighter)
/// per-user dimension bounds afterwards.
const MAX_DECODE_DIMENSION: u32 = 10_000;
const MAX_DECODE_ALLOC: u64 = 512 * 1024 * 1024;

/// What the probe learned about an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbedContent {
    pub file_type: FileType,
    pub mime_type: String,
    pub extension: &'static str,
    pub width: u32,
    pub height: u32,
}

impl ProbedContent {
    pub fn aspect_ratio(&self) -> f64 {
        aspect_ratio(self.width, self.height)
    }
}

fn decode_limits() -> Limits {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_DECODE_DIMENSION);
    limits.max_image_height = Some(MAX_DECODE_DIMENSION);
    limits.max_alloc = Some(MAX_DECODE_ALLOC);
    limits
}

/// Canonical extension for a sniffed format. The three supported formats map
/// to the storage-key extensions; anything else keeps its own name so the
/// policy error can cite it.
fn extension_for(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "jpg",
        ImageFormat::Png => "png",
        ImageFormat::WebP => "webp",
        other => other.extensions_str().first().copied().unwrap_or("bin"),
    }
}

/// Sniff the content type from magic bytes and extract image dimensions.
///
/// The full decode (not just the header read) runs so that truncated or
/// corrupt files are rejected here rather than at variant-generation time.
/// Callers should run this on the blocking pool for large payloads.
pub fn probe(bytes: &[u8]) -> Result<ProbedContent, AppError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| AppError::InvalidFormat(format!("Unreadable content: {}", e)))?;

    let format = reader
        .format()
        .ok_or_else(|| AppError::InvalidFormat("Unrecognized file content".to_string()))?;

    // Header dimensions first: oversize files are refused before any pixel
    // allocation happens.
    let mut dim_reader = ImageReader::new(Cursor::new(bytes));
    dim_reader.set_format(format);
    let (header_width, header_height) = dim_reader
        .into_dimensions()
        .map_err(|e| AppError::InvalidFormat(format!("Corrupt {} data: {}", format_name(format), e)))?;
    if header_width > MAX_DECODE_DIMENSION || header_height > MAX_DECODE_DIMENSION {
        return Err(AppError::DimensionsOutOfBounds {
            width: header_width,
            height: header_height,
        });
    }

    let mut reader = ImageReader::new(Cursor::new(bytes));
    reader.set_format(format);
    reader.limits(decode_limits());
    let img = reader.decode().map_err(|e| match e {
        ImageError::Limits(_) => AppError::DimensionsOutOfBounds {
            width: header_width,
            height: header_height,
        },
        other => AppError::InvalidFormat(format!(
            "Corrupt {} data: {}",
            format_name(format),
            other
        )),
    })?;

    let (width, height) = img.dimensions();

    Ok(ProbedContent {
        file_type: FileType::Image,
        mime_type: format.to_mime_type().to_string(),
        extension: extension_for(format),
        width,
        height,
    })
}

fn format_name(format: ImageFormat) -> &'static str {
    format.extensions_str().first().copied().unwrap_or("image")
}

#[cfg(test)]
mod tests {
    use super::*;

    // 1x1 red pixel, produced with the image crate
    fn tiny_png() -> Vec<u8> {
        let mut out = Vec::new();
        let img = image::RgbImage::from_pixel(1, 1, image::Rgb([255, 0, 0]));
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    fn tiny_jpeg(width: u32, height: u32) -> Vec<u8> {
        let mut out = Vec::new();
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([10, 20, 30]));
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
            .unwrap();
        out
    }

    #[test]
    fn test_probe_png() {
        let probed = probe(&tiny_png()).unwrap();
        assert_eq!(probed.mime_type, "image/png");
        assert_eq!(probed.extension, "png");
        assert_eq!((probed.width, probed.height), (1, 1));
        assert_eq!(probed.file_type, FileType::Image);
    }

    #[test]
    fn test_probe_jpeg_dimensions() {
        let probed = probe(&tiny_jpeg(32, 16)).unwrap();
        assert_eq!(probed.mime_type, "image/jpeg");
        assert_eq!(probed.extension, "jpg");
        assert_eq!((probed.width, probed.height), (32, 16));
        assert_eq!(probed.aspect_ratio(), 2.0);
    }

    #[test]
    fn test_probe_ignores_declared_type() {
        // probe never sees a filename or header, only bytes
        let probed = probe(&tiny_png()).unwrap();
        assert_eq!(probed.mime_type, "image/png");
    }

    #[test]
    fn test_probe_rejects_non_image_bytes() {
        let err = probe(b"#!/bin/sh\necho hello\n").unwrap_err();
        assert!(matches!(err, AppError::InvalidFormat(_)));
    }

    #[test]
    fn test_probe_rejects_truncated_image() {
        let mut bytes = tiny_png();
        bytes.truncate(bytes.len() / 2);
        let err = probe(&bytes).unwrap_err();
        assert!(matches!(err, AppError::InvalidFormat(_)));
    }

    #[test]
    fn test_probe_rejects_empty() {
        assert!(matches!(probe(b""), Err(AppError::InvalidFormat(_))));
    }
}
