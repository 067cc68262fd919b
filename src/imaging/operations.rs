//! Layer operations.
//!
//! These functions combine the pure [`calculations`](super::calculations)
//! with pixel work. Each takes an image by value or reference and returns a
//! new one; nothing here touches the network or the filesystem.
//!
//! | Operation | Implementation |
//! |---|---|
//! | Crop | `DynamicImage::crop_imm` on rounded percentage bands |
//! | Rotate | exact transposes for right angles, bilinear inverse mapping otherwise |
//! | Filter | [`filters::apply`](super::filters::apply) |
//! | Scale | `resize_exact` with `Lanczos3` |
//! | Watermark | diagonal text copies via [`TextRenderer`] |
//! | Paste | `imageops::overlay` (alpha-over) |
//! | Final resize | `thumbnail` (area) to shrink, `CatmullRom` to enlarge |
//! | Encode | `JpegEncoder` with quality and DPI density |

use super::calculations::{
    crop_bounds, final_dimensions, rotated_bounds, scaled_dimensions, watermark_font_size,
    watermark_positions,
};
use super::params::{FontFamily, ImageTransform, Quality};
use super::text::TextRenderer;
use super::{ImagingError, filters};
use image::codecs::jpeg::{JpegEncoder, PixelDensity};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use rayon::prelude::*;

pub use filters::apply as apply_filter;

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, ImagingError>;

/// Number of extra diagonal watermark copies after the first.
pub const WATERMARK_REPEAT: u32 = 5;

/// Watermark ink: black at alpha 100.
pub const WATERMARK_COLOR: Rgba<u8> = Rgba([0, 0, 0, 100]);

/// Remove horizontal bands from the top and bottom, as percentages of height.
///
/// `0/0` returns the image unchanged. Overlapping bands produce an empty
/// image, which the next scaling step reports as invalid geometry.
pub fn crop(image: DynamicImage, top_pct: f64, bottom_pct: f64) -> DynamicImage {
    if top_pct == 0.0 && bottom_pct == 0.0 {
        return image;
    }
    let (top, height) = crop_bounds(image.height(), top_pct, bottom_pct);
    image.crop_imm(0, top, image.width(), height)
}

/// Rotate counter-clockwise about the centre, expanding the bounds.
///
/// Right angles are exact pixel transposes. Other angles are bilinear
/// resampled; uncovered corners are transparent.
pub fn rotate(image: DynamicImage, degrees: f64) -> DynamicImage {
    let normalized = degrees.rem_euclid(360.0);
    if normalized == 0.0 {
        return image;
    }
    // image's rotate90/rotate270 are clockwise.
    if normalized == 90.0 {
        return image.rotate270();
    }
    if normalized == 180.0 {
        return image.rotate180();
    }
    if normalized == 270.0 {
        return image.rotate90();
    }
    DynamicImage::ImageRgba8(rotate_bilinear(&image.to_rgba8(), normalized))
}

fn rotate_bilinear(src: &RgbaImage, degrees: f64) -> RgbaImage {
    let (w, h) = src.dimensions();
    let (out_w, out_h) = rotated_bounds(w, h, degrees);
    let mut out = RgbaImage::new(out_w, out_h);
    if w == 0 || h == 0 {
        return out;
    }

    let (sin, cos) = degrees.to_radians().sin_cos();
    let src_cx = w as f64 / 2.0;
    let src_cy = h as f64 / 2.0;
    let dst_cx = out_w as f64 / 2.0;
    let dst_cy = out_h as f64 / 2.0;

    out.par_chunks_mut(4 * out_w as usize)
        .enumerate()
        .for_each(|(y, row)| {
            let dy = y as f64 + 0.5 - dst_cy;
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let dx = x as f64 + 0.5 - dst_cx;
                // Inverse of a counter-clockwise rotation in y-down space.
                let sx = dx * cos - dy * sin + src_cx - 0.5;
                let sy = dx * sin + dy * cos + src_cy - 0.5;
                px.copy_from_slice(&sample_bilinear(src, sx, sy));
            }
        });
    out
}

/// Bilinear sample; taps outside the source count as transparent.
fn sample_bilinear(src: &RgbaImage, x: f64, y: f64) -> [u8; 4] {
    let (w, h) = (src.width() as i64, src.height() as i64);
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let tap = |tx: i64, ty: i64| -> [f64; 4] {
        if tx < 0 || ty < 0 || tx >= w || ty >= h {
            return [0.0; 4];
        }
        let p = src.get_pixel(tx as u32, ty as u32);
        let a = p[3] as f64;
        // Premultiply so transparent taps do not darken edges.
        [p[0] as f64 * a, p[1] as f64 * a, p[2] as f64 * a, a]
    };

    let weights = [
        ((1.0 - fx) * (1.0 - fy), tap(x0, y0)),
        (fx * (1.0 - fy), tap(x0 + 1, y0)),
        ((1.0 - fx) * fy, tap(x0, y0 + 1)),
        (fx * fy, tap(x0 + 1, y0 + 1)),
    ];
    let mut acc = [0f64; 4];
    for (weight, values) in weights {
        for c in 0..4 {
            acc[c] += weight * values[c];
        }
    }
    let alpha = acc[3];
    if alpha <= 0.0 {
        return [0, 0, 0, 0];
    }
    [
        (acc[0] / alpha).round().clamp(0.0, 255.0) as u8,
        (acc[1] / alpha).round().clamp(0.0, 255.0) as u8,
        (acc[2] / alpha).round().clamp(0.0, 255.0) as u8,
        alpha.round().clamp(0.0, 255.0) as u8,
    ]
}

/// Resize to `width_pct` of `canvas_width`, keeping the aspect ratio.
pub fn scale_to_canvas(
    image: DynamicImage,
    width_pct: f64,
    canvas_width: u32,
) -> Result<DynamicImage> {
    if image.width() == 0 || image.height() == 0 {
        return Err(ImagingError::geometry(
            image.width(),
            image.height(),
            "source layer is empty",
        ));
    }
    let (w, h) = scaled_dimensions(image.dimensions(), width_pct, canvas_width);
    if w == 0 || h == 0 {
        return Err(ImagingError::geometry(w, h, "scaled layer has no area"));
    }
    Ok(image.resize_exact(w, h, FilterType::Lanczos3))
}

/// Stamp diagonal translucent copies of `text` across the image.
pub fn watermark(image: DynamicImage, text: &str, renderer: &TextRenderer) -> DynamicImage {
    let mut rgba = image.to_rgba8();
    let (w, h) = rgba.dimensions();
    let size = watermark_font_size(w, h);
    for origin in watermark_positions(w, h, WATERMARK_REPEAT) {
        renderer.draw_line(&mut rgba, text, FontFamily::Arial, size, origin, WATERMARK_COLOR);
    }
    DynamicImage::ImageRgba8(rgba)
}

/// Run one layer's transform chain: crop, rotate, filter, scale, watermark.
pub fn transform_layer(
    image: DynamicImage,
    transform: &ImageTransform,
    canvas_width: u32,
    watermark_text: Option<&str>,
    renderer: &TextRenderer,
) -> Result<RgbaImage> {
    let image = crop(image, transform.crop_top_pct, transform.crop_bottom_pct);
    let image = rotate(image, transform.rotation_deg);
    let image = apply_filter(image, transform.filter);
    let image = scale_to_canvas(image, transform.width_pct, canvas_width)?;
    let image = match watermark_text {
        Some(text) if !text.is_empty() => watermark(image, text, renderer),
        _ => image,
    };
    Ok(image.to_rgba8())
}

/// Alpha-over `layer` onto `canvas` with its top-left corner at `origin`.
///
/// Parts of the layer falling outside the canvas are clipped.
pub fn paste(canvas: &mut RgbaImage, layer: &RgbaImage, origin: (i64, i64)) {
    imageops::overlay(canvas, layer, origin.0, origin.1);
}

/// Resize the finished canvas to `target_width`, keeping the aspect ratio.
///
/// Area averaging when shrinking, Catmull-Rom when enlarging, untouched when
/// the width already matches.
pub fn resize_to_width(canvas: RgbaImage, target_width: u32) -> Result<RgbaImage> {
    let (w, h) = canvas.dimensions();
    if target_width == w {
        return Ok(canvas);
    }
    let (new_w, new_h) = final_dimensions((w, h), target_width);
    if new_w == 0 || new_h == 0 {
        return Err(ImagingError::geometry(new_w, new_h, "output size has no area"));
    }
    if new_w < w {
        Ok(imageops::thumbnail(&canvas, new_w, new_h))
    } else {
        Ok(imageops::resize(&canvas, new_w, new_h, FilterType::CatmullRom))
    }
}

/// Encode as baseline JPEG with the given quality and DPI density.
///
/// Alpha is dropped; the canvas is expected to be opaque.
pub fn encode_jpeg(canvas: &RgbaImage, quality: Quality, dpi: u16) -> Result<Vec<u8>> {
    let rgb = DynamicImage::ImageRgba8(canvas.clone()).to_rgb8();
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality.value() as u8);
    encoder.set_pixel_density(PixelDensity::dpi(dpi));
    encoder.encode_image(&rgb)?;
    Ok(bytes)
}
