//! Test image fixtures.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

/// Encode a solid-color PNG of the given dimensions.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::new();
    let img = RgbImage::from_pixel(width, height, Rgb([40, 90, 200]));
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .expect("png encode");
    out
}

/// Encode a JPEG of the given dimensions. A pixel gradient keeps two
/// fixtures with different dimensions from hashing identically.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::new();
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
        .expect("jpeg encode");
    out
}

/// Bytes that start like an MP4 container; the probe must reject them.
pub fn mp4_bytes() -> Vec<u8> {
    let mut out = vec![0x00, 0x00, 0x00, 0x20];
    out.extend_from_slice(b"ftypisom");
    out.extend_from_slice(&[0u8; 64]);
    out
}
