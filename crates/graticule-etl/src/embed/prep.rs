//! Image preparation: decode, orient, crop, resize, normalize.
//!
//! Every embedding backend consumes the same canonical input: a 224x224
//! RGB image in CHW f32 layout, normalized per channel with the CLIP
//! constants. Decoding happens once per request and the prepared image is
//! shared across fallback tiers.

use image::imageops::FilterType;
use image::DynamicImage;
use std::io::Cursor;

use crate::error::EmbedError;

/// Side length of the square backend input.
pub const INPUT_SIZE: u32 = 224;

/// Per-channel normalization mean (CLIP training statistics).
pub const CHANNEL_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];

/// Per-channel normalization standard deviation.
pub const CHANNEL_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// A decoded, canonically oriented, normalized image ready for embedding.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    /// CHW layout, `3 * INPUT_SIZE * INPUT_SIZE` values.
    pub pixels: Vec<f32>,
}

impl PreparedImage {
    /// One normalized channel plane.
    #[must_use]
    pub fn channel(&self, c: usize) -> &[f32] {
        let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
        &self.pixels[c * plane..(c + 1) * plane]
    }
}

/// Decode raw image bytes into the canonical backend input.
///
/// Pipeline: decode, apply EXIF orientation, strip alpha, center-crop to
/// square, Catmull-Rom resize to [`INPUT_SIZE`], normalize per channel.
pub fn prepare_image(bytes: &[u8]) -> Result<PreparedImage, EmbedError> {
    let decoded =
        image::load_from_memory(bytes).map_err(|e| EmbedError::Decode(e.to_string()))?;
    let oriented = apply_orientation(decoded, read_orientation(bytes));

    // to_rgb8 strips any alpha channel.
    let rgb = oriented.to_rgb8();
    let (w, h) = rgb.dimensions();
    if w == 0 || h == 0 {
        return Err(EmbedError::Decode("empty image".to_string()));
    }

    let side = w.min(h);
    let x = (w - side) / 2;
    let y = (h - side) / 2;
    let cropped = image::imageops::crop_imm(&rgb, x, y, side, side).to_image();
    let resized =
        image::imageops::resize(&cropped, INPUT_SIZE, INPUT_SIZE, FilterType::CatmullRom);

    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut pixels = vec![0.0_f32; 3 * plane];
    for (i, pixel) in resized.pixels().enumerate() {
        for c in 0..3 {
            let value = f32::from(pixel.0[c]) / 255.0;
            pixels[c * plane + i] = (value - CHANNEL_MEAN[c]) / CHANNEL_STD[c];
        }
    }

    Ok(PreparedImage { pixels })
}

/// Read the EXIF orientation tag, if any. Missing or malformed EXIF data is
/// treated as upright.
fn read_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    exif::Reader::new()
        .read_from_container(&mut cursor)
        .ok()
        .and_then(|data| {
            data.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
                .and_then(|field| field.value.get_uint(0))
        })
        .unwrap_or(1)
}

/// Rotate/flip into canonical orientation per the EXIF orientation value.
fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage, RgbaImage};

    fn png_bytes(img: &DynamicImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).expect("encode");
        out.into_inner()
    }

    #[test]
    fn test_prepare_image_produces_chw_layout() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, image::Rgb([255, 0, 0])));
        let prepared = prepare_image(&png_bytes(&img)).expect("prepare");
        assert_eq!(
            prepared.pixels.len(),
            3 * (INPUT_SIZE * INPUT_SIZE) as usize
        );
        // Uniform red: the red plane is constant and above the green plane.
        let r = prepared.channel(0);
        let g = prepared.channel(1);
        assert!(r.iter().all(|&v| (v - r[0]).abs() < 1e-6));
        assert!(r[0] > g[0]);
    }

    #[test]
    fn test_prepare_image_strips_alpha() {
        let img =
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(32, 48, image::Rgba([0, 0, 255, 10])));
        let prepared = prepare_image(&png_bytes(&img)).expect("prepare");
        assert_eq!(
            prepared.pixels.len(),
            3 * (INPUT_SIZE * INPUT_SIZE) as usize
        );
    }

    #[test]
    fn test_prepare_image_center_crops_non_square() {
        // Left half black, right half white; a 200x100 image center-crops to
        // the middle 100x100, which spans the boundary.
        let mut img = RgbImage::new(200, 100);
        for (x, _, p) in img.enumerate_pixels_mut() {
            *p = if x < 100 {
                image::Rgb([0, 0, 0])
            } else {
                image::Rgb([255, 255, 255])
            };
        }
        let prepared =
            prepare_image(&png_bytes(&DynamicImage::ImageRgb8(img))).expect("prepare");
        let r = prepared.channel(0);
        let min = r.iter().copied().fold(f32::INFINITY, f32::min);
        let max = r.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        assert!(max > min, "crop should keep both halves");
    }

    #[test]
    fn test_prepare_image_rejects_garbage() {
        let result = prepare_image(b"not an image at all");
        assert!(matches!(result, Err(EmbedError::Decode(_))));
    }
}
