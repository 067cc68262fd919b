//! Pure calculation functions for layout geometry.
//!
//! All functions here are pure and testable without any I/O or images.
//! Percentages are always `0..=100`, pixel results are truncated toward zero
//! the way the composition layout expects.

use super::params::{Alignment, REFERENCE_WIDTH};

/// Rows kept by a percentage crop of an image of height `height`.
///
/// Returns `(top_row, kept_height)`. The band boundaries are rounded to the
/// nearest row. A crop whose bands overlap yields a kept height of zero; the
/// caller reports that as invalid geometry.
///
/// # Examples
/// ```
/// # use photo_compose::imaging::crop_bounds;
/// assert_eq!(crop_bounds(100, 0.0, 0.0), (0, 100));
/// assert_eq!(crop_bounds(100, 10.0, 25.0), (10, 65));
/// assert_eq!(crop_bounds(100, 60.0, 60.0), (60, 0));
/// ```
pub fn crop_bounds(height: u32, top_pct: f64, bottom_pct: f64) -> (u32, u32) {
    let h = height as f64;
    let top = (h * top_pct / 100.0).round().clamp(0.0, h) as u32;
    let bottom = (h - (h * bottom_pct / 100.0).round()).clamp(0.0, h) as u32;
    (top, bottom.saturating_sub(top))
}

/// Target dimensions for a layer scaled to a percentage of the canvas width.
///
/// Width is `width_pct` of `canvas_width`; height follows the source aspect
/// ratio. Both are truncated.
///
/// # Examples
/// ```
/// # use photo_compose::imaging::scaled_dimensions;
/// // 200x100 layer at 30% of a 1000px canvas
/// assert_eq!(scaled_dimensions((200, 100), 30.0, 1000), (300, 150));
/// ```
pub fn scaled_dimensions(source: (u32, u32), width_pct: f64, canvas_width: u32) -> (u32, u32) {
    let (src_w, src_h) = source;
    let width = (width_pct * canvas_width as f64 / 100.0).floor();
    if width <= 0.0 || src_w == 0 {
        return (0, 0);
    }
    let height = (width * src_h as f64 / src_w as f64).floor();
    (width as u32, height.max(0.0) as u32)
}

/// Pixel offset of a percentage position along one canvas dimension.
///
/// # Examples
/// ```
/// # use photo_compose::imaging::position_px;
/// assert_eq!(position_px(10.0, 1000), 100);
/// assert_eq!(position_px(50.0, 500), 250);
/// assert_eq!(position_px(33.3, 1000), 333);
/// ```
pub fn position_px(pct: f64, dimension: u32) -> i64 {
    (pct * dimension as f64 / 100.0).floor() as i64
}

/// Global scale factor applied to declared text sizes.
///
/// Uses the requested output width when set, the canvas width otherwise.
///
/// # Examples
/// ```
/// # use photo_compose::imaging::scale_factor;
/// assert_eq!(scale_factor(Some(2000), 1000), 2.0);
/// assert_eq!(scale_factor(None, 500), 0.5);
/// ```
pub fn scale_factor(output_width: Option<u32>, canvas_width: u32) -> f64 {
    output_width.unwrap_or(canvas_width) as f64 / REFERENCE_WIDTH
}

/// Largest text size in pixels after scaling.
pub const MAX_TEXT_PX: u32 = 8192;

/// Declared text size multiplied by the scale factor, truncated, within
/// 1..=[`MAX_TEXT_PX`].
pub fn scaled_font_size(size: u32, factor: f64) -> u32 {
    ((size as f64 * factor) as u32).clamp(1, MAX_TEXT_PX)
}

/// Final output dimensions when resizing to `target_width`.
///
/// # Examples
/// ```
/// # use photo_compose::imaging::final_dimensions;
/// assert_eq!(final_dimensions((1000, 1500), 500), (500, 750));
/// assert_eq!(final_dimensions((1000, 333), 500), (500, 166));
/// ```
pub fn final_dimensions(source: (u32, u32), target_width: u32) -> (u32, u32) {
    let (w, h) = source;
    if w == 0 {
        return (target_width, 0);
    }
    let height = (target_width as u64 * h as u64) / w as u64;
    (target_width, height as u32)
}

/// Bounding box of a `width x height` image rotated by `degrees`.
///
/// Multiples of 90 degrees are exact; other angles round the expanded box up
/// to whole pixels.
///
/// # Examples
/// ```
/// # use photo_compose::imaging::rotated_bounds;
/// assert_eq!(rotated_bounds(200, 100, 0.0), (200, 100));
/// assert_eq!(rotated_bounds(200, 100, 90.0), (100, 200));
/// assert_eq!(rotated_bounds(200, 100, -180.0), (200, 100));
/// assert_eq!(rotated_bounds(100, 100, 45.0), (142, 142));
/// ```
pub fn rotated_bounds(width: u32, height: u32, degrees: f64) -> (u32, u32) {
    let normalized = degrees.rem_euclid(360.0);
    if normalized == 0.0 || normalized == 180.0 {
        return (width, height);
    }
    if normalized == 90.0 || normalized == 270.0 {
        return (height, width);
    }
    let (sin, cos) = normalized.to_radians().sin_cos();
    let (w, h) = (width as f64, height as f64);
    let out_w = w * cos.abs() + h * sin.abs();
    let out_h = w * sin.abs() + h * cos.abs();
    ((out_w - 1e-9).ceil() as u32, (out_h - 1e-9).ceil() as u32)
}

/// Watermark text size for an image: a twentieth of the short edge, at least 10.
pub fn watermark_font_size(width: u32, height: u32) -> u32 {
    (width.min(height) / 20).max(10)
}

/// Anchor points for `repeat` diagonal watermark copies.
///
/// Copies sit at `(i * w/(n+1), i * h/(n+1))` for `i` in `0..=n`, so the
/// first copy is at the origin and `n + 1` copies are drawn in total.
///
/// # Examples
/// ```
/// # use photo_compose::imaging::watermark_positions;
/// let p = watermark_positions(600, 300, 5);
/// assert_eq!(p.len(), 6);
/// assert_eq!(p[0], (0, 0));
/// assert_eq!(p[1], (100, 50));
/// assert_eq!(p[5], (500, 250));
/// ```
pub fn watermark_positions(width: u32, height: u32, repeat: u32) -> Vec<(i64, i64)> {
    let step_x = (width / (repeat + 1)) as i64;
    let step_y = (height / (repeat + 1)) as i64;
    (0..=repeat as i64).map(|i| (step_x * i, step_y * i)).collect()
}

/// Horizontal shift applied to a text line of `line_width` pixels.
///
/// # Examples
/// ```
/// # use photo_compose::imaging::{alignment_offset, Alignment};
/// assert_eq!(alignment_offset(Alignment::Left, 120), 0);
/// assert_eq!(alignment_offset(Alignment::Center, 120), -60);
/// assert_eq!(alignment_offset(Alignment::Right, 120), -120);
/// ```
pub fn alignment_offset(align: Alignment, line_width: u32) -> i64 {
    match align {
        Alignment::Left => 0,
        Alignment::Center => -(line_width as i64 / 2),
        Alignment::Right => -(line_width as i64),
    }
}
