//! Colour filters for foreground layers.
//!
//! | Filter | Recipe |
//! |---|---|
//! | Grayscale | `image::DynamicImage::grayscale` (luminance, alpha kept) |
//! | Cartoon | 5x5 median of luminance → adaptive mean threshold (block 9, C=7) → bilateral smoothing (d=9, σ=300) masked by the edges |
//!
//! The cartoon pipeline is deterministic but only approximates the usual
//! OpenCV recipe; it is not meant to be pixel-identical to it.

use super::params::Filter;
use image::{DynamicImage, GrayImage, RgbaImage};
use rayon::prelude::*;

const MEDIAN_RADIUS: u32 = 2;
const THRESHOLD_RADIUS: u32 = 4;
const THRESHOLD_C: i32 = 7;
const BILATERAL_RADIUS: i32 = 4;
const SIGMA_COLOR: f64 = 300.0;
const SIGMA_SPACE: f64 = 300.0;

/// Apply `filter` to an image. [`Filter::None`] returns the input untouched.
pub fn apply(image: DynamicImage, filter: Filter) -> DynamicImage {
    match filter {
        Filter::None => image,
        Filter::Grayscale => image.grayscale(),
        Filter::Cartoon => DynamicImage::ImageRgba8(cartoon(&image.to_rgba8())),
    }
}

/// Edge-masked bilateral smoothing. Pixels off the edge mask become black;
/// alpha is carried over from the source.
pub fn cartoon(src: &RgbaImage) -> RgbaImage {
    let gray = image::imageops::grayscale(src);
    let blurred = median(&gray, MEDIAN_RADIUS);
    let edges = adaptive_threshold(&blurred, THRESHOLD_RADIUS, THRESHOLD_C);
    let mut smooth = bilateral(src, BILATERAL_RADIUS, SIGMA_COLOR, SIGMA_SPACE);

    for (pixel, mask) in smooth.pixels_mut().zip(edges.pixels()) {
        if mask[0] == 0 {
            pixel[0] = 0;
            pixel[1] = 0;
            pixel[2] = 0;
        }
    }
    smooth
}

/// Clamp-to-edge sample coordinate.
fn clamp_coord(v: i64, max: u32) -> u32 {
    v.clamp(0, max as i64 - 1) as u32
}

/// Square median filter with replicated borders.
pub(crate) fn median(src: &GrayImage, radius: u32) -> GrayImage {
    let (w, h) = src.dimensions();
    if w == 0 || h == 0 {
        return src.clone();
    }
    let r = radius as i64;
    let side = (2 * radius + 1) as usize;
    let mut out = GrayImage::new(w, h);

    out.par_chunks_mut(w as usize)
        .enumerate()
        .for_each(|(y, row)| {
            let mut window = Vec::with_capacity(side * side);
            for (x, value) in row.iter_mut().enumerate() {
                window.clear();
                for dy in -r..=r {
                    let sy = clamp_coord(y as i64 + dy, h);
                    for dx in -r..=r {
                        let sx = clamp_coord(x as i64 + dx, w);
                        window.push(src.get_pixel(sx, sy)[0]);
                    }
                }
                let mid = window.len() / 2;
                *value = *window.select_nth_unstable(mid).1;
            }
        });
    out
}

/// Binary threshold against the local block mean minus `c`.
///
/// Output is 255 where `src > mean - c`, 0 elsewhere.
pub(crate) fn adaptive_threshold(src: &GrayImage, radius: u32, c: i32) -> GrayImage {
    let (w, h) = src.dimensions();
    if w == 0 || h == 0 {
        return src.clone();
    }
    let r = radius as i64;
    let area = ((2 * radius + 1) * (2 * radius + 1)) as u32;

    // Horizontal window sums, then vertical sums over those.
    let mut row_sums = vec![0u32; (w * h) as usize];
    row_sums
        .par_chunks_mut(w as usize)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, sum) in row.iter_mut().enumerate() {
                *sum = (-r..=r)
                    .map(|dx| src.get_pixel(clamp_coord(x as i64 + dx, w), y as u32)[0] as u32)
                    .sum();
            }
        });

    let mut out = GrayImage::new(w, h);
    out.par_chunks_mut(w as usize)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, value) in row.iter_mut().enumerate() {
                let total: u32 = (-r..=r)
                    .map(|dy| {
                        let sy = clamp_coord(y as i64 + dy, h);
                        row_sums[(sy * w) as usize + x]
                    })
                    .sum();
                let mean = ((total + area / 2) / area) as i32;
                let pixel = src.get_pixel(x as u32, y as u32)[0] as i32;
                *value = if pixel > mean - c { 255 } else { 0 };
            }
        });
    out
}

/// Edge-preserving smoothing over a circular neighbourhood.
///
/// Colour distance is the sum of absolute channel differences, looked up in
/// a precomputed Gaussian table.
pub(crate) fn bilateral(src: &RgbaImage, radius: i32, sigma_color: f64, sigma_space: f64) -> RgbaImage {
    let (w, h) = src.dimensions();
    if w == 0 || h == 0 {
        return src.clone();
    }

    let color_coeff = -0.5 / (sigma_color * sigma_color);
    let space_coeff = -0.5 / (sigma_space * sigma_space);
    let color_weights: Vec<f64> = (0..=255 * 3)
        .map(|d| ((d * d) as f64 * color_coeff).exp())
        .collect();

    let mut kernel = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let dist2 = (dx * dx + dy * dy) as f64;
            if dist2.sqrt() <= radius as f64 {
                kernel.push((dx, dy, (dist2 * space_coeff).exp()));
            }
        }
    }

    let mut out = RgbaImage::new(w, h);
    out.par_chunks_mut(4 * w as usize)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let center = src.get_pixel(x as u32, y as u32);
                let mut acc = [0f64; 3];
                let mut norm = 0f64;
                for &(dx, dy, spatial) in &kernel {
                    let sx = clamp_coord(x as i64 + dx as i64, w);
                    let sy = clamp_coord(y as i64 + dy as i64, h);
                    let sample = src.get_pixel(sx, sy);
                    let diff: usize = (0..3)
                        .map(|c| (sample[c] as i32 - center[c] as i32).unsigned_abs() as usize)
                        .sum();
                    let weight = spatial * color_weights[diff];
                    for c in 0..3 {
                        acc[c] += sample[c] as f64 * weight;
                    }
                    norm += weight;
                }
                for c in 0..3 {
                    px[c] = (acc[c] / norm).round().clamp(0.0, 255.0) as u8;
                }
                px[3] = center[3];
            }
        });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Pixel, Rgba};

    fn gradient(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| Rgba([(x * 10) as u8, (y * 10) as u8, 128, 255]))
    }

    #[test]
    fn none_is_identity() {
        let src = DynamicImage::ImageRgba8(gradient(12, 9));
        let out = apply(src.clone(), Filter::None);
        assert_eq!(out.to_rgba8(), src.to_rgba8());
    }

    #[test]
    fn unknown_name_leaves_image_identical() {
        let src = DynamicImage::ImageRgba8(gradient(12, 9));
        let out = apply(src.clone(), Filter::from_name("vintage"));
        assert_eq!(out.as_bytes(), src.as_bytes());
    }

    #[test]
    fn grayscale_has_equal_channels() {
        let src = DynamicImage::ImageRgba8(gradient(12, 9));
        let out = apply(src, Filter::Grayscale).to_rgba8();
        for p in out.pixels() {
            assert_eq!(p[0], p[1]);
            assert_eq!(p[1], p[2]);
            assert_eq!(p[3], 255);
        }
    }

    #[test]
    fn grayscale_matches_luma() {
        let src = gradient(4, 4);
        let out = apply(DynamicImage::ImageRgba8(src.clone()), Filter::Grayscale).to_rgba8();
        let expected = src.get_pixel(2, 3).to_luma()[0];
        assert_eq!(out.get_pixel(2, 3)[0], expected);
    }

    #[test]
    fn median_removes_salt_noise() {
        let mut img = GrayImage::from_pixel(9, 9, Luma([50]));
        img.put_pixel(4, 4, Luma([255]));
        let out = median(&img, 2);
        assert_eq!(out.get_pixel(4, 4)[0], 50);
    }

    #[test]
    fn threshold_of_flat_image_is_white() {
        // src == mean, and src > mean - 7
        let img = GrayImage::from_pixel(20, 20, Luma([90]));
        let out = adaptive_threshold(&img, 4, 7);
        assert!(out.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn threshold_marks_dark_line() {
        let mut img = GrayImage::from_pixel(20, 20, Luma([200]));
        for y in 0..20 {
            img.put_pixel(10, y, Luma([0]));
        }
        let out = adaptive_threshold(&img, 4, 7);
        assert_eq!(out.get_pixel(10, 10)[0], 0);
        assert_eq!(out.get_pixel(2, 10)[0], 255);
    }

    #[test]
    fn bilateral_keeps_flat_colour() {
        let img = RgbaImage::from_pixel(10, 10, Rgba([10, 200, 30, 255]));
        let out = bilateral(&img, 4, 300.0, 300.0);
        assert_eq!(out.get_pixel(5, 5), &Rgba([10, 200, 30, 255]));
    }

    #[test]
    fn cartoon_preserves_dimensions_and_alpha() {
        let mut src = gradient(16, 12);
        src.put_pixel(3, 3, Rgba([0, 0, 0, 7]));
        let out = cartoon(&src);
        assert_eq!(out.dimensions(), (16, 12));
        assert_eq!(out.get_pixel(3, 3)[3], 7);
    }

    #[test]
    fn cartoon_is_deterministic() {
        let src = gradient(16, 12);
        assert_eq!(cartoon(&src), cartoon(&src));
    }
}
