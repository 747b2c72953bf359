//! Image helpers for map digitization: crops, derived crops and data URLs.

pub mod annotate;
pub mod color;

pub use annotate::annotate_directions;
pub use color::{area_fractions, color_thresholds, median_color, nearest_color_name, to_hex};

use crate::error::{GeoMapError, Result};
use crate::meta::BBox;
use base64::{engine::general_purpose::STANDARD, Engine};
use image::{imageops, ImageFormat, RgbImage};
use std::io::Cursor;
use std::path::Path;

/// Decode an image into RGB
pub fn decode(bytes: &[u8]) -> Result<RgbImage> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Encode an RGB image as PNG bytes
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// Pixel dimensions `(width, height)` of an image file without decoding it
pub fn image_size(path: &Path) -> Result<(u32, u32)> {
    Ok(image::image_dimensions(path)?)
}

/// Copy the pixels inside `bbox`. The box must be non-degenerate and in bounds.
pub fn crop(image: &RgbImage, bbox: &BBox) -> Result<RgbImage> {
    if !bbox.is_usable(image.width(), image.height()) {
        return Err(GeoMapError::InvalidInput(format!(
            "Box {:?} outside image {}x{}",
            <[i32; 4]>::from(*bbox),
            image.width(),
            image.height()
        )));
    }
    Ok(imageops::crop_imm(
        image,
        bbox.x0 as u32,
        bbox.y0 as u32,
        bbox.width() as u32,
        bbox.height() as u32,
    )
    .to_image())
}

/// Stitch the four corners of `image` into one 2x2 composite.
///
/// Each corner is `fraction` of the width and height. Coordinate labels of a
/// main map sit in its margins, so the composite keeps all of them in one
/// small image.
pub fn corner_composite(image: &RgbImage, fraction: f32) -> RgbImage {
    let (width, height) = image.dimensions();
    let cw = ((width as f32 * fraction) as u32).clamp(1, width.max(1));
    let ch = ((height as f32 * fraction) as u32).clamp(1, height.max(1));

    let corners = [
        (0, 0),
        (width - cw, 0),
        (0, height - ch),
        (width - cw, height - ch),
    ];

    let mut out = RgbImage::new(cw * 2, ch * 2);
    for (i, (x, y)) in corners.into_iter().enumerate() {
        let corner = imageops::crop_imm(image, x, y, cw, ch).to_image();
        let dx = (i as u32 % 2) * cw;
        let dy = (i as u32 / 2) * ch;
        imageops::replace(&mut out, &corner, dx as i64, dy as i64);
    }
    out
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// Base64 data URL for already-encoded image bytes
pub fn data_url(bytes: &[u8], mime: &str) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Data URL for encoded bytes, halving the image first if it is at or over `limit` bytes.
pub fn data_url_within_limit(bytes: &[u8], mime: &str, limit: u64) -> Result<String> {
    if (bytes.len() as u64) < limit {
        return Ok(data_url(bytes, mime));
    }
    let image = decode(bytes)?;
    let resized = imageops::resize(
        &image,
        (image.width() / 2).max(1),
        (image.height() / 2).max(1),
        imageops::FilterType::Triangle,
    );
    log::debug!(
        "Image of {} bytes over upload limit, sending {}x{} copy",
        bytes.len(),
        resized.width(),
        resized.height()
    );
    Ok(data_url(&encode_png(&resized)?, "image/png"))
}

/// Data URL for an image file on disk
pub fn file_data_url(path: &Path, limit: u64) -> Result<String> {
    let bytes = std::fs::read(path)?;
    data_url_within_limit(&bytes, mime_for(path), limit)
}
