//! Parameter types for layer operations.
//!
//! These structs describe *what* to do to a layer, not *how*. They are the
//! interface between the [`pipeline`](crate::pipeline) (which decides the
//! order of operations) and the pixel code in
//! [`operations`](super::operations) and [`text`](super::text).
//!
//! ## Types
//!
//! - [`Quality`]: JPEG encoding quality (1–100, default 90). Clamped on construction.
//! - [`Filter`]: closed set of colour filters; unknown names parse to [`Filter::None`].
//! - [`FontFamily`]: enumerated font families mapped to resource files.
//! - [`HexColor`]: 6-hex-digit RGB colour.
//! - [`ImageTransform`]: per-layer geometry: crop, rotation, filter, width, position.
//! - [`TextLayer`]: one text block with its style and placement.

use super::ImagingError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Baseline width that declared text sizes are authored against.
pub const REFERENCE_WIDTH: f64 = 1000.0;

/// Marker splitting a text layer's content into lines.
pub const LINE_BREAK: &str = "<br>";

/// Extra vertical pixels between consecutive text lines.
pub const LINE_GAP: u32 = 5;

/// Quality setting for JPEG encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u32")]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

impl From<u32> for Quality {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

/// Colour filter applied to a foreground layer.
///
/// Parsed leniently from request strings: `"nb"` and `"grayscale"` select the
/// luminance filter, anything unrecognised degrades to [`Filter::None`] with a
/// warning rather than failing the job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Filter {
    #[default]
    None,
    Grayscale,
    Cartoon,
}

impl Filter {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Filter::None,
            "nb" | "grayscale" | "greyscale" | "gray" | "grey" => Filter::Grayscale,
            "cartoon" => Filter::Cartoon,
            other => {
                tracing::warn!(filter = other, "unknown filter, layer left untouched");
                Filter::None
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Filter::None => "none",
            Filter::Grayscale => "grayscale",
            Filter::Cartoon => "cartoon",
        }
    }
}

impl From<String> for Filter {
    fn from(value: String) -> Self {
        Filter::from_name(&value)
    }
}

impl From<Filter> for String {
    fn from(value: Filter) -> Self {
        value.as_str().to_string()
    }
}

/// Font families a text layer may request.
///
/// Each family maps to one resource file inside the configured fonts
/// directory. See [`FontFamily::file_name`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontFamily {
    #[default]
    Arial,
    Avenir,
    Helvetica,
    Roboto,
    /// Times New Roman.
    Tnr,
    Verdana,
}

impl FontFamily {
    pub const ALL: [FontFamily; 6] = [
        FontFamily::Arial,
        FontFamily::Avenir,
        FontFamily::Helvetica,
        FontFamily::Roboto,
        FontFamily::Tnr,
        FontFamily::Verdana,
    ];

    /// Resource file for this family, relative to the fonts directory.
    pub fn file_name(self) -> &'static str {
        match self {
            FontFamily::Arial => "arial.ttf",
            FontFamily::Avenir => "AvenirNextCyr-Regular.ttf",
            FontFamily::Helvetica => "Helvetica.ttf",
            FontFamily::Roboto => "Roboto-Medium.ttf",
            FontFamily::Tnr => "TimesNewRoman.ttf",
            FontFamily::Verdana => "Verdana.ttf",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FontFamily::Arial => "arial",
            FontFamily::Avenir => "avenir",
            FontFamily::Helvetica => "helvetica",
            FontFamily::Roboto => "roboto",
            FontFamily::Tnr => "tnr",
            FontFamily::Verdana => "verdana",
        }
    }
}

/// Horizontal anchoring of each text line relative to its x position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
}

/// How glyph coverage is produced and painted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderStrategy {
    /// Rasterize at the target size and paint the fill.
    Basic,
    /// Paint a contrasting stroke, then the fill on top.
    Outlined,
    /// Paint an offset translucent dark copy, then the fill.
    Shadow,
    /// Rasterize at 4x and downsample before painting.
    #[default]
    #[serde(alias = "combined")]
    HighRes,
}

/// An opaque RGB colour written as six hex digits (`"1a2b3c"`, optional `#`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HexColor(pub [u8; 3]);

impl HexColor {
    pub const BLACK: HexColor = HexColor([0, 0, 0]);
    pub const WHITE: HexColor = HexColor([255, 255, 255]);

    pub fn parse(value: &str) -> Result<Self, ImagingError> {
        let digits = value.strip_prefix('#').unwrap_or(value);
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ImagingError::InvalidColor(value.to_string()));
        }
        let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16);
        match (channel(0), channel(2), channel(4)) {
            (Ok(r), Ok(g), Ok(b)) => Ok(HexColor([r, g, b])),
            _ => Err(ImagingError::InvalidColor(value.to_string())),
        }
    }

    /// Perceived brightness (ITU-R 601 weights), 0-255.
    pub fn luminance(self) -> f64 {
        let [r, g, b] = self.0;
        0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64
    }

    pub fn rgba(self, alpha: u8) -> image::Rgba<u8> {
        let [r, g, b] = self.0;
        image::Rgba([r, g, b, alpha])
    }
}

impl Default for HexColor {
    fn default() -> Self {
        HexColor::BLACK
    }
}

impl fmt::Display for HexColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.0;
        write!(f, "{r:02x}{g:02x}{b:02x}")
    }
}

impl TryFrom<String> for HexColor {
    type Error = ImagingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        HexColor::parse(&value)
    }
}

impl From<HexColor> for String {
    fn from(value: HexColor) -> Self {
        value.to_string()
    }
}

/// Geometry and filter for one foreground layer.
///
/// Percentages: crops are relative to the layer's own height, `width_pct` to
/// the canvas width at paste time, positions to the canvas dimensions.
///
/// Flattened into request records, so unknown keys are left to the
/// enclosing struct.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageTransform {
    pub crop_top_pct: f64,
    pub crop_bottom_pct: f64,
    pub rotation_deg: f64,
    pub filter: Filter,
    pub width_pct: f64,
    pub x_pct: f64,
    pub y_pct: f64,
}

impl Default for ImageTransform {
    fn default() -> Self {
        Self {
            crop_top_pct: 0.0,
            crop_bottom_pct: 0.0,
            rotation_deg: 0.0,
            filter: Filter::None,
            width_pct: 100.0,
            x_pct: 0.0,
            y_pct: 0.0,
        }
    }
}

/// One text block drawn on top of the composed image layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextLayer {
    pub text: String,
    #[serde(default)]
    pub font: FontFamily,
    /// Point size as authored against [`REFERENCE_WIDTH`].
    #[serde(default = "default_text_size")]
    pub size: u32,
    #[serde(default)]
    pub color: HexColor,
    #[serde(default)]
    pub x_pct: f64,
    #[serde(default)]
    pub y_pct: f64,
    #[serde(default)]
    pub align: Alignment,
    #[serde(default)]
    pub strategy: RenderStrategy,
}

fn default_text_size() -> u32 {
    20
}

impl TextLayer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            font: FontFamily::default(),
            size: default_text_size(),
            color: HexColor::default(),
            x_pct: 0.0,
            y_pct: 0.0,
            align: Alignment::default(),
            strategy: RenderStrategy::default(),
        }
    }

    /// Reject positions outside 0-100 and sizes outside 1-1000.
    ///
    /// Colours are already validated when parsed into [`HexColor`].
    pub fn validate(&self) -> Result<(), ImagingError> {
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        if !in_range(self.x_pct) || !in_range(self.y_pct) {
            return Err(ImagingError::InvalidText(format!(
                "text positions must be within 0-100%, got ({}, {})",
                self.x_pct, self.y_pct
            )));
        }
        if !(1..=1000).contains(&self.size) {
            return Err(ImagingError::InvalidText(format!(
                "text size must be within 1-1000, got {}",
                self.size
            )));
        }
        Ok(())
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.text.split(LINE_BREAK)
    }
}
