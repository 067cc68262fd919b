//! Layer transform engine: pure Rust, no network or filesystem access.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Crop / rotate / scale** | `image` (`crop_imm`, transposes, `resize_exact` Lanczos3) |
//! | **Filters** | `image::grayscale` + custom median / threshold / bilateral |
//! | **Text** | `usvg` layout + `resvg` raster, built-in bitmap fallback |
//! | **Paste** | `image::imageops::overlay` |
//! | **Encode** | `JpegEncoder` with DPI density |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for layout math (unit testable)
//! - **Parameters**: Data structures describing layer transforms and text
//! - **Filters**, **Fonts**, **Text**: pixel-level building blocks
//! - **Operations**: High-level functions combining calculations + pixels

mod bitmap_font;
mod calculations;
mod error;
pub mod filters;
pub mod fonts;
pub mod operations;
mod params;
pub mod text;

pub use calculations::{
    alignment_offset, crop_bounds, final_dimensions, position_px, rotated_bounds, scale_factor,
    scaled_dimensions, scaled_font_size, watermark_font_size, watermark_positions, MAX_TEXT_PX,
};
pub use error::ImagingError;
pub use fonts::{FontBook, ResolvedFont};
pub use operations::{
    crop, encode_jpeg, paste, resize_to_width, rotate, scale_to_canvas, transform_layer, watermark,
};
pub use params::{
    Alignment, Filter, FontFamily, HexColor, ImageTransform, LINE_BREAK, LINE_GAP, Quality,
    REFERENCE_WIDTH, RenderStrategy, TextLayer,
};
pub use text::TextRenderer;
