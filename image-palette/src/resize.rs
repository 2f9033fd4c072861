//! Crop-to-fill derivatives and JPEG encoding.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageResult};

/// JPEG quality used for every stored derivative.
pub const JPEG_QUALITY: u8 = 85;

/// Scales `image` to cover `width`×`height` and center-crops the overflow.
///
/// The result is always exactly the requested size; aspect ratio is preserved
/// by cropping, never by letterboxing.
pub fn fit_exact(image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    let width = width.max(1);
    let height = height.max(1);
    let fitted = image.resize_to_fill(width, height, FilterType::Lanczos3);
    if fitted.dimensions() == (width, height) {
        fitted
    } else {
        fitted.resize_exact(width, height, FilterType::Lanczos3)
    }
}

/// Encodes `image` as baseline RGB JPEG.
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> ImageResult<Vec<u8>> {
    let rgb = image.to_rgb8();
    let mut buf = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
        encoder.encode_image(&rgb)?;
    }
    Ok(buf)
}
