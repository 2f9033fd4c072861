//! Dominant-color extraction and derivative sizing for ingested photos.
//!
//! Palettes are computed on a small thumbnail (bounded by [`THUMBNAIL_BOUND`])
//! with an adaptive median-cut reduction down to at most [`PALETTE_SIZE`]
//! colors. Each reported color carries the fraction of thumbnail pixels it
//! covers, so fractions always sum to 1.0 for a non-empty image.

use std::collections::BTreeMap;

use image::{DynamicImage, GenericImageView, ImageResult};
use serde::{Deserialize, Serialize};

mod resize;

pub use resize::{encode_jpeg, fit_exact, JPEG_QUALITY};

/// Longest edge of the thumbnail used for palette extraction.
pub const THUMBNAIL_BOUND: u32 = 100;
/// Maximum number of colors reported per image.
pub const PALETTE_SIZE: usize = 6;

/// One palette entry: hex color plus the share of thumbnail pixels it covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaletteColor {
    /// Lowercase `#rrggbb` string.
    pub hex: String,
    /// Pixel count divided by total thumbnail pixels, in `0.0..=1.0`.
    #[serde(rename = "percentage")]
    pub fraction: f64,
}

/// Decodes any supported raster format from raw bytes.
pub fn decode(bytes: &[u8]) -> ImageResult<DynamicImage> {
    image::load_from_memory(bytes)
}

/// Width / height, or 0.0 for a degenerate image.
pub fn aspect_ratio(image: &DynamicImage) -> f64 {
    let (width, height) = image.dimensions();
    if height == 0 {
        return 0.0;
    }
    f64::from(width) / f64::from(height)
}

/// Extracts up to [`PALETTE_SIZE`] dominant colors from a
/// [`THUMBNAIL_BOUND`] thumbnail.
pub fn dominant_colors(image: &DynamicImage) -> Vec<PaletteColor> {
    palette(image, PALETTE_SIZE, THUMBNAIL_BOUND)
}

/// Extracts up to `max_colors` dominant colors from a thumbnail whose longest
/// side is at most `max_side`. Both limits are raised to 1 when zero.
///
/// Colors are ordered by pixel count descending; equal counts fall back to the
/// higher RGB tuple first so the output is fully deterministic.
pub fn palette(image: &DynamicImage, max_colors: usize, max_side: u32) -> Vec<PaletteColor> {
    let thumb = thumbnail_within(image, max_side.max(1));
    let rgb = thumb.to_rgb8();
    let total = rgb.width() as usize * rgb.height() as usize;
    if total == 0 {
        return Vec::new();
    }

    let pixels: Vec<[u8; 3]> = rgb.pixels().map(|pixel| pixel.0).collect();
    let boxes = median_cut(pixels, max_colors.max(1));

    // Two boxes can average to the same color; merge them like a palette lookup would.
    let mut counts: BTreeMap<[u8; 3], usize> = BTreeMap::new();
    for color_box in &boxes {
        *counts.entry(color_box.average()).or_default() += color_box.pixels.len();
    }

    let mut ranked: Vec<(usize, [u8; 3])> =
        counts.into_iter().map(|(color, count)| (count, color)).collect();
    ranked.sort_unstable_by(|a, b| b.cmp(a));
    ranked
        .into_iter()
        .map(|(count, [r, g, b])| PaletteColor {
            hex: format!("#{r:02x}{g:02x}{b:02x}"),
            fraction: count as f64 / total as f64,
        })
        .collect()
}

fn thumbnail_within(image: &DynamicImage, bound: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width <= bound && height <= bound {
        return image.clone();
    }
    image.thumbnail(bound, bound)
}

struct ColorBox {
    pixels: Vec<[u8; 3]>,
}

impl ColorBox {
    fn ranges(&self) -> [u8; 3] {
        let mut min = [u8::MAX; 3];
        let mut max = [u8::MIN; 3];
        for pixel in &self.pixels {
            for channel in 0..3 {
                min[channel] = min[channel].min(pixel[channel]);
                max[channel] = max[channel].max(pixel[channel]);
            }
        }
        [
            max[0].saturating_sub(min[0]),
            max[1].saturating_sub(min[1]),
            max[2].saturating_sub(min[2]),
        ]
    }

    fn widest(&self) -> (usize, u8) {
        let ranges = self.ranges();
        let mut best = (0usize, ranges[0]);
        for (channel, &range) in ranges.iter().enumerate().skip(1) {
            if range > best.1 {
                best = (channel, range);
            }
        }
        best
    }

    fn split(mut self) -> (ColorBox, ColorBox) {
        let (channel, _) = self.widest();
        self.pixels
            .sort_unstable_by_key(|pixel| (pixel[channel], pixel[0], pixel[1], pixel[2]));
        let upper = self.pixels.split_off(self.pixels.len() / 2);
        (self, ColorBox { pixels: upper })
    }

    fn average(&self) -> [u8; 3] {
        let len = self.pixels.len().max(1) as u64;
        let mut sums = [0u64; 3];
        for pixel in &self.pixels {
            for channel in 0..3 {
                sums[channel] += u64::from(pixel[channel]);
            }
        }
        [
            ((sums[0] + len / 2) / len) as u8,
            ((sums[1] + len / 2) / len) as u8,
            ((sums[2] + len / 2) / len) as u8,
        ]
    }
}

fn median_cut(pixels: Vec<[u8; 3]>, max_colors: usize) -> Vec<ColorBox> {
    let mut boxes = vec![ColorBox { pixels }];
    while boxes.len() < max_colors {
        let candidate = boxes
            .iter()
            .enumerate()
            .filter(|(_, color_box)| color_box.pixels.len() > 1)
            .map(|(idx, color_box)| (color_box.widest().1, color_box.pixels.len(), idx))
            .filter(|(range, _, _)| *range > 0)
            .max();
        let Some((_, _, idx)) = candidate else {
            break;
        };
        let (lower, upper) = boxes.swap_remove(idx).split();
        boxes.push(lower);
        boxes.push(upper);
    }
    boxes
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use pretty_assertions::assert_eq;

    fn solid(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    #[test]
    fn solid_image_has_single_full_color() {
        let colors = dominant_colors(&solid(240, 160, [12, 200, 90]));
        assert_eq!(
            colors,
            vec![PaletteColor {
                hex: "#0cc85a".to_string(),
                fraction: 1.0
            }]
        );
    }

    #[test]
    fn small_images_are_not_upscaled() {
        let colors = dominant_colors(&solid(10, 10, [255, 255, 255]));
        assert_eq!(colors.len(), 1);
        assert_eq!(colors[0].fraction, 1.0);
    }

    #[test]
    fn split_image_reports_larger_share_first() {
        let mut img = RgbImage::from_pixel(100, 100, Rgb([0, 0, 255]));
        for y in 0..100 {
            for x in 0..75 {
                img.put_pixel(x, y, Rgb([255, 0, 0]));
            }
        }
        let colors = dominant_colors(&DynamicImage::ImageRgb8(img));
        assert_eq!(colors.len(), 2);
        assert_eq!(colors[0].hex, "#ff0000");
        assert!((colors[0].fraction - 0.75).abs() < 1e-9);
        assert_eq!(colors[1].hex, "#0000ff");
        assert!((colors[1].fraction - 0.25).abs() < 1e-9);
    }

    #[test]
    fn equal_counts_break_ties_on_color() {
        let mut img = RgbImage::from_pixel(10, 10, Rgb([10, 10, 10]));
        for y in 0..5 {
            for x in 0..10 {
                img.put_pixel(x, y, Rgb([200, 10, 10]));
            }
        }
        let colors = dominant_colors(&DynamicImage::ImageRgb8(img));
        assert_eq!(colors[0].hex, "#c80a0a");
        assert_eq!(colors[1].hex, "#0a0a0a");
    }

    #[test]
    fn palette_never_exceeds_limit_and_sums_to_one() {
        let img = RgbImage::from_fn(100, 100, |x, y| Rgb([(x * 2) as u8, (y * 2) as u8, 77]));
        let colors = dominant_colors(&DynamicImage::ImageRgb8(img));
        assert!(colors.len() <= PALETTE_SIZE);
        let total: f64 = colors.iter().map(|c| c.fraction).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(colors.windows(2).all(|w| w[0].fraction >= w[1].fraction));
    }

    #[test]
    fn custom_limits_shrink_the_palette() {
        let img = RgbImage::from_fn(64, 64, |x, y| Rgb([(x * 4) as u8, (y * 4) as u8, 0]));
        let image = DynamicImage::ImageRgb8(img);
        assert_eq!(palette(&image, 2, 16).len(), 2);
        let single = palette(&image, 0, 0);
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].fraction, 1.0);
    }

    #[test]
    fn aspect_ratio_is_width_over_height() {
        assert_eq!(aspect_ratio(&solid(300, 150, [0, 0, 0])), 2.0);
    }
}
