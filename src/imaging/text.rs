//! Text rasterization and painting.
//!
//! A line of text becomes a [`LineMask`]: an 8-bit coverage image plus the
//! offset of its top-left corner from the line origin. Masks come from one of
//! two engines:
//!
//! | Source | Engine |
//! |---|---|
//! | Loaded font file | SVG `<text>` laid out by `usvg`, rasterized by `resvg` |
//! | Built-in font | [`bitmap_font`](super::bitmap_font) cells rescaled to the size |
//!
//! Painting composites the fill colour through the mask with source-over
//! blending. Render strategies layer extra passes (stroke, shadow) under the
//! fill or change how coverage is produced (4x supersampling).

use super::bitmap_font;
use super::calculations::{alignment_offset, position_px};
use super::fonts::{FontBook, ResolvedFont};
use super::params::{FontFamily, HexColor, LINE_GAP, RenderStrategy, TextLayer};
use super::ImagingError;
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, Rgba, RgbaImage};
use resvg::tiny_skia;

/// Supersampling factor for [`RenderStrategy::HighRes`].
const HIGH_RES_FACTOR: u32 = 4;

/// Largest supersampled size; bigger text is rasterized directly.
const MAX_SUPERSAMPLE_PX: u32 = 4096;

/// Shadow colour painted under the fill.
const SHADOW: Rgba<u8> = Rgba([0, 0, 0, 128]);

/// Coverage of one rasterized line.
#[derive(Debug, Clone, PartialEq)]
pub struct LineMask {
    pub mask: GrayImage,
    /// Offset of the mask's left edge from the line origin.
    pub left: i64,
    /// Offset of the mask's top edge from the line origin.
    pub top: i64,
}

impl LineMask {
    fn blank() -> Self {
        Self {
            mask: GrayImage::new(0, 0),
            left: 0,
            top: 0,
        }
    }

    /// Horizontal extent from the line origin, used for alignment.
    pub fn advance(&self) -> u32 {
        (self.left + self.mask.width() as i64).max(0) as u32
    }

    pub fn is_blank(&self) -> bool {
        self.mask.width() == 0 || self.mask.height() == 0
    }
}

/// Rasterizes and paints text using a [`FontBook`].
#[derive(Debug, Clone)]
pub struct TextRenderer {
    fonts: FontBook,
}

impl TextRenderer {
    pub fn new(fonts: FontBook) -> Self {
        Self { fonts }
    }

    /// Renderer that only has the built-in bitmap font.
    pub fn builtin() -> Self {
        Self::new(FontBook::empty())
    }

    pub fn fonts(&self) -> &FontBook {
        &self.fonts
    }

    /// Draw a validated text layer onto `canvas` at `size_px` pixels.
    ///
    /// Lines split on `<br>` stack downward from the layer position with a
    /// pitch of `size_px + 5`.
    pub fn render(
        &self,
        canvas: &mut RgbaImage,
        layer: &TextLayer,
        size_px: u32,
    ) -> Result<(), ImagingError> {
        layer.validate()?;
        let font = self.fonts.resolve(layer.font);
        let x0 = position_px(layer.x_pct, canvas.width());
        let y0 = position_px(layer.y_pct, canvas.height());
        let pitch = (size_px + LINE_GAP) as i64;

        for (i, line) in layer.lines().enumerate() {
            let mask = self.coverage(&font, line, size_px, layer.strategy);
            if mask.is_blank() {
                continue;
            }
            let x = x0 + alignment_offset(layer.align, mask.advance());
            let y = y0 + i as i64 * pitch;
            paint(canvas, &mask, (x, y), layer.color, layer.strategy);
        }
        Ok(())
    }

    /// Draw one line of text with an explicit RGBA colour.
    pub fn draw_line(
        &self,
        canvas: &mut RgbaImage,
        text: &str,
        family: FontFamily,
        size_px: u32,
        origin: (i64, i64),
        color: Rgba<u8>,
    ) {
        let font = self.fonts.resolve(family);
        let mask = self.coverage(&font, text, size_px, RenderStrategy::Basic);
        if !mask.is_blank() {
            blend_mask(canvas, &mask, origin, color);
        }
    }

    /// Coverage mask for a line, honouring the supersampling strategy.
    pub fn coverage(
        &self,
        font: &ResolvedFont,
        text: &str,
        size_px: u32,
        strategy: RenderStrategy,
    ) -> LineMask {
        if strategy != RenderStrategy::HighRes {
            return self.rasterize(font, text, size_px);
        }
        let big_size = match size_px.checked_mul(HIGH_RES_FACTOR) {
            Some(big_size) if big_size <= MAX_SUPERSAMPLE_PX => big_size,
            _ => return self.rasterize(font, text, size_px),
        };
        let big = self.rasterize(font, text, big_size);
        if big.is_blank() {
            return big;
        }
        let w = big.mask.width().div_ceil(HIGH_RES_FACTOR);
        let h = big.mask.height().div_ceil(HIGH_RES_FACTOR);
        LineMask {
            mask: imageops::resize(&big.mask, w, h, FilterType::Triangle),
            left: big.left.div_euclid(HIGH_RES_FACTOR as i64),
            top: big.top.div_euclid(HIGH_RES_FACTOR as i64),
        }
    }

    fn rasterize(&self, font: &ResolvedFont, text: &str, size_px: u32) -> LineMask {
        if text.is_empty() {
            return LineMask::blank();
        }
        match font {
            ResolvedFont::Face(family) => match self.rasterize_face(family, text, size_px) {
                Ok(mask) => mask,
                Err(e) => {
                    tracing::warn!(family = %family, error = %e, "text layout failed, using built-in font");
                    builtin_mask(text, size_px)
                }
            },
            ResolvedFont::Builtin => builtin_mask(text, size_px),
        }
    }

    fn rasterize_face(&self, family: &str, text: &str, size_px: u32) -> Result<LineMask, String> {
        let svg = format!(
            concat!(
                r#"<svg xmlns="http://www.w3.org/2000/svg" width="1" height="1">"#,
                r#"<text x="0" y="0" font-family="{family}" font-size="{size}" "#,
                r##"dominant-baseline="text-before-edge" fill="#ffffff" xml:space="preserve">"##,
                "{text}</text></svg>"
            ),
            family = xml_escape(family),
            size = size_px,
            text = xml_escape(text),
        );
        let opts = usvg::Options {
            fontdb: self.fonts.database(),
            ..Default::default()
        };
        let tree = usvg::Tree::from_str(&svg, &opts).map_err(|e| e.to_string())?;
        if !tree.root().has_children() {
            // Whitespace-only lines lay out to nothing.
            return Ok(LineMask::blank());
        }

        let bbox = tree.root().abs_bounding_box();
        let left = bbox.left().floor();
        let top = bbox.top().floor();
        let width = (bbox.right().ceil() - left).max(1.0) as u32;
        let height = (bbox.bottom().ceil() - top).max(1.0) as u32;

        let mut pixmap = tiny_skia::Pixmap::new(width, height)
            .ok_or_else(|| format!("cannot allocate {width}x{height} text surface"))?;
        let xform = tiny_skia::Transform::from_translate(-left, -top);
        resvg::render(&tree, xform, &mut pixmap.as_mut());

        let alpha: Vec<u8> = pixmap.data().chunks_exact(4).map(|px| px[3]).collect();
        let mask = GrayImage::from_raw(width, height, alpha)
            .ok_or_else(|| "text surface size mismatch".to_string())?;
        Ok(LineMask {
            mask,
            left: left as i64,
            top: top as i64,
        })
    }
}

fn builtin_mask(text: &str, size_px: u32) -> LineMask {
    LineMask {
        mask: bitmap_font::rasterize(text, size_px),
        left: 0,
        top: 0,
    }
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Paint a line mask with the passes its strategy calls for.
fn paint(
    canvas: &mut RgbaImage,
    mask: &LineMask,
    origin: (i64, i64),
    color: HexColor,
    strategy: RenderStrategy,
) {
    let size = mask.mask.height();
    match strategy {
        RenderStrategy::Outlined => {
            let radius = ((size as f64 / 18.0).round() as u32).max(1);
            let stroke = dilate(mask, radius);
            let stroke_color = if color.luminance() > 128.0 {
                HexColor::BLACK
            } else {
                HexColor::WHITE
            };
            blend_mask(canvas, &stroke, origin, stroke_color.rgba(255));
        }
        RenderStrategy::Shadow => {
            let offset = ((size as f64 / 20.0).round() as i64).max(1);
            blend_mask(canvas, mask, (origin.0 + offset, origin.1 + offset), SHADOW);
        }
        RenderStrategy::Basic | RenderStrategy::HighRes => {}
    }
    blend_mask(canvas, mask, origin, color.rgba(255));
}

/// Grow a mask by `radius` pixels in every direction (square max filter).
fn dilate(line: &LineMask, radius: u32) -> LineMask {
    let (w, h) = line.mask.dimensions();
    let r = radius as i64;
    let out_w = w + 2 * radius;
    let out_h = h + 2 * radius;

    let sample = |x: i64, y: i64| -> u8 {
        if x < 0 || y < 0 || x >= w as i64 || y >= h as i64 {
            0
        } else {
            line.mask.get_pixel(x as u32, y as u32)[0]
        }
    };

    // Horizontal pass, then vertical.
    let horizontal = GrayImage::from_fn(out_w, h, |x, y| {
        let cx = x as i64 - r;
        let v = (cx - r..=cx + r).map(|sx| sample(sx, y as i64)).max();
        Luma([v.unwrap_or(0)])
    });
    let mask = GrayImage::from_fn(out_w, out_h, |x, y| {
        let cy = y as i64 - r;
        let v = (cy - r..=cy + r)
            .filter(|&sy| sy >= 0 && sy < h as i64)
            .map(|sy| horizontal.get_pixel(x, sy as u32)[0])
            .max();
        Luma([v.unwrap_or(0)])
    });

    LineMask {
        mask,
        left: line.left - r,
        top: line.top - r,
    }
}

/// Source-over composite of `color` through `line` onto `canvas`.
///
/// Pixels falling outside the canvas are clipped.
pub fn blend_mask(canvas: &mut RgbaImage, line: &LineMask, origin: (i64, i64), color: Rgba<u8>) {
    let (cw, ch) = canvas.dimensions();
    let base_x = origin.0 + line.left;
    let base_y = origin.1 + line.top;
    let color_alpha = color[3] as f64 / 255.0;

    for (mx, my, coverage) in line.mask.enumerate_pixels() {
        if coverage[0] == 0 {
            continue;
        }
        let x = base_x + mx as i64;
        let y = base_y + my as i64;
        if x < 0 || y < 0 || x >= cw as i64 || y >= ch as i64 {
            continue;
        }
        let a = coverage[0] as f64 / 255.0 * color_alpha;
        let dst = canvas.get_pixel_mut(x as u32, y as u32);
        let dst_a = dst[3] as f64 / 255.0;
        let out_a = a + dst_a * (1.0 - a);
        if out_a <= 0.0 {
            continue;
        }
        for c in 0..3 {
            let blended =
                (color[c] as f64 * a + dst[c] as f64 * dst_a * (1.0 - a)) / out_a;
            dst[c] = blended.round().clamp(0.0, 255.0) as u8;
        }
        dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::params::Alignment;

    fn white(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255]))
    }

    /// Bounding box (x0, y0, x1, y1) of pixels darker than mid-grey.
    fn dark_bounds(img: &RgbaImage) -> Option<(u32, u32, u32, u32)> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y, p) in img.enumerate_pixels() {
            if p[0] < 128 {
                bounds = Some(match bounds {
                    None => (x, y, x, y),
                    Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                });
            }
        }
        bounds
    }

    fn layer(text: &str, x: f64, y: f64) -> TextLayer {
        TextLayer {
            x_pct: x,
            y_pct: y,
            ..TextLayer::new(text)
        }
    }

    #[test]
    fn text_starts_at_percentage_position() {
        let renderer = TextRenderer::builtin();
        let mut canvas = white(1000, 1000);
        renderer.render(&mut canvas, &layer("Test", 40.0, 50.0), 24).unwrap();

        let (x0, y0, _, y1) = dark_bounds(&canvas).unwrap();
        assert_eq!((x0, y0), (400, 500));
        // 'T' covers seven of the eight cell rows
        assert_eq!(y1 - y0 + 1, 21);
    }

    #[test]
    fn text_size_scales_bounding_box() {
        let renderer = TextRenderer::builtin();
        let mut small = white(1000, 1000);
        let mut large = white(2000, 2000);
        renderer.render(&mut small, &layer("Test", 10.0, 10.0), 24).unwrap();
        renderer.render(&mut large, &layer("Test", 10.0, 10.0), 48).unwrap();

        let (sx0, sy0, sx1, sy1) = dark_bounds(&small).unwrap();
        let (lx0, ly0, lx1, ly1) = dark_bounds(&large).unwrap();
        let ratio_w = (lx1 - lx0 + 1) as f64 / (sx1 - sx0 + 1) as f64;
        let ratio_h = (ly1 - ly0 + 1) as f64 / (sy1 - sy0 + 1) as f64;
        assert!((ratio_w - 2.0).abs() < 0.1, "width ratio {ratio_w}");
        assert!((ratio_h - 2.0).abs() < 0.1, "height ratio {ratio_h}");
    }

    #[test]
    fn line_breaks_stack_with_pitch() {
        let renderer = TextRenderer::builtin();
        let mut canvas = white(400, 400);
        let l = TextLayer {
            strategy: RenderStrategy::Basic,
            ..layer("I<br>I", 0.0, 0.0)
        };
        renderer.render(&mut canvas, &l, 16).unwrap();
        // 'I' stem is native column 2, rows 0-6 -> pixels 4-5, rows 0-13
        assert!(canvas.get_pixel(4, 0)[0] < 128);
        assert!(canvas.get_pixel(4, 21)[0] < 128);
        assert!(canvas.get_pixel(4, 16)[0] > 128);
    }

    #[test]
    fn right_alignment_ends_at_anchor() {
        let renderer = TextRenderer::builtin();
        let mut canvas = white(400, 100);
        let l = TextLayer {
            align: Alignment::Right,
            strategy: RenderStrategy::Basic,
            ..layer("HH", 50.0, 0.0)
        };
        renderer.render(&mut canvas, &l, 8).unwrap();
        let (x0, _, x1, _) = dark_bounds(&canvas).unwrap();
        // two 6px cells ending at x=200; last column of each cell is spacing
        assert_eq!(x0, 188);
        assert_eq!(x1, 198);
    }

    #[test]
    fn center_alignment_straddles_anchor() {
        let renderer = TextRenderer::builtin();
        let mut canvas = white(400, 100);
        let l = TextLayer {
            align: Alignment::Center,
            strategy: RenderStrategy::Basic,
            ..layer("HH", 50.0, 0.0)
        };
        renderer.render(&mut canvas, &l, 8).unwrap();
        let (x0, _, _, _) = dark_bounds(&canvas).unwrap();
        assert_eq!(x0, 194);
    }

    #[test]
    fn invalid_layer_is_rejected() {
        let renderer = TextRenderer::builtin();
        let mut canvas = white(10, 10);
        let err = renderer.render(&mut canvas, &layer("x", 150.0, 0.0), 8).unwrap_err();
        assert!(matches!(err, ImagingError::InvalidText(_)));
    }

    #[test]
    fn outlined_text_draws_contrasting_stroke() {
        let renderer = TextRenderer::builtin();
        let mut canvas = RgbaImage::from_pixel(100, 60, Rgba([128, 128, 128, 255]));
        let l = TextLayer {
            color: HexColor::WHITE,
            strategy: RenderStrategy::Outlined,
            ..layer("I", 20.0, 20.0)
        };
        renderer.render(&mut canvas, &l, 16).unwrap();
        // white fill on the stem, black stroke just left of it
        assert_eq!(canvas.get_pixel(24, 15)[0], 255);
        assert_eq!(canvas.get_pixel(23, 15)[0], 0);
    }

    #[test]
    fn shadow_sits_below_right_of_fill() {
        let renderer = TextRenderer::builtin();
        let mut canvas = white(100, 60);
        let l = TextLayer {
            color: HexColor([255, 0, 0]),
            strategy: RenderStrategy::Shadow,
            ..layer("I", 20.0, 20.0)
        };
        renderer.render(&mut canvas, &l, 16).unwrap();
        // stem at x 24-25; shadow offset 1px -> column 26 is shadow only
        let fill = canvas.get_pixel(24, 15);
        assert_eq!((fill[0], fill[1]), (255, 0));
        let shadow = canvas.get_pixel(26, 15);
        assert!(shadow[0] < 200 && shadow[0] == shadow[1]);
    }

    #[test]
    fn blend_clips_outside_canvas() {
        let mut canvas = white(4, 4);
        let mask = LineMask {
            mask: GrayImage::from_pixel(3, 3, Luma([255])),
            left: 0,
            top: 0,
        };
        blend_mask(&mut canvas, &mask, (-1, 2), Rgba([0, 0, 0, 255]));
        assert_eq!(canvas.get_pixel(0, 3)[0], 0);
        assert_eq!(canvas.get_pixel(1, 3)[0], 0);
        assert_eq!(canvas.get_pixel(2, 3)[0], 255);
        assert_eq!(canvas.get_pixel(0, 1)[0], 255);
    }

    #[test]
    fn translucent_colour_blends() {
        let mut canvas = white(1, 1);
        let mask = LineMask {
            mask: GrayImage::from_pixel(1, 1, Luma([255])),
            left: 0,
            top: 0,
        };
        blend_mask(&mut canvas, &mask, (0, 0), Rgba([0, 0, 0, 100]));
        // 255 * (1 - 100/255) = 155
        assert_eq!(canvas.get_pixel(0, 0)[0], 155);
        assert_eq!(canvas.get_pixel(0, 0)[3], 255);
    }

    #[test]
    fn high_res_matches_basic_extent() {
        let renderer = TextRenderer::builtin();
        let basic = renderer.coverage(&ResolvedFont::Builtin, "Abc", 20, RenderStrategy::Basic);
        let high = renderer.coverage(&ResolvedFont::Builtin, "Abc", 20, RenderStrategy::HighRes);
        assert_eq!(basic.mask.dimensions(), high.mask.dimensions());
    }

    #[test]
    fn oversized_high_res_rasterizes_directly() {
        let renderer = TextRenderer::builtin();
        let basic = renderer.coverage(&ResolvedFont::Builtin, "I", 1100, RenderStrategy::Basic);
        let high = renderer.coverage(&ResolvedFont::Builtin, "I", 1100, RenderStrategy::HighRes);
        assert_eq!(high, basic);
        assert_eq!(high.mask.height(), 1100);

        let huge = renderer.coverage(&ResolvedFont::Builtin, "", u32::MAX, RenderStrategy::HighRes);
        assert!(huge.is_blank());
    }

    #[test]
    fn empty_line_is_blank() {
        let renderer = TextRenderer::builtin();
        assert!(renderer
            .coverage(&ResolvedFont::Builtin, "", 20, RenderStrategy::HighRes)
            .is_blank());
    }

    // ========================================================================
    // Font files
    // ========================================================================

    const SYSTEM_FONTS: &[&str] = &[
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/TTF/DejaVuSans.ttf",
        "/usr/share/fonts/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
        "/Library/Fonts/Arial.ttf",
        "/System/Library/Fonts/Supplemental/Arial.ttf",
    ];

    /// A fonts directory holding one system face installed as `arial.ttf`.
    fn fonts_dir_with_arial() -> Option<tempfile::TempDir> {
        let source = SYSTEM_FONTS.iter().map(std::path::Path::new).find(|p| p.is_file())?;
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::copy(source, dir.path().join(FontFamily::Arial.file_name())).unwrap();
        Some(dir)
    }

    #[test]
    fn font_file_renders_at_layer_position() {
        let Some(dir) = fonts_dir_with_arial() else {
            eprintln!("no system TrueType font found, skipping");
            return;
        };
        let book = FontBook::load(dir.path());
        assert_eq!(book.loaded(), 1);
        let ResolvedFont::Face(name) = book.resolve(FontFamily::Arial) else {
            panic!("arial.ttf did not resolve to a face");
        };
        assert!(!name.is_empty());

        let renderer = TextRenderer::new(book);
        let mut canvas = white(400, 200);
        let l = TextLayer {
            strategy: RenderStrategy::Basic,
            ..layer("H", 10.0, 10.0)
        };
        renderer.render(&mut canvas, &l, 40).unwrap();

        let (x0, y0, x1, y1) = dark_bounds(&canvas).unwrap();
        // anchored at (40, 20); a 40px capital spans roughly three quarters of the em
        assert!((40..=50).contains(&x0), "left edge {x0}");
        assert!((20..=40).contains(&y0), "top edge {y0}");
        assert!((15..=45).contains(&(x1 - x0 + 1)), "width {}", x1 - x0 + 1);
        assert!((20..=40).contains(&(y1 - y0 + 1)), "height {}", y1 - y0 + 1);
    }

    #[test]
    fn missing_family_falls_back_to_arial_face() {
        let Some(dir) = fonts_dir_with_arial() else {
            eprintln!("no system TrueType font found, skipping");
            return;
        };
        let book = FontBook::load(dir.path());
        let arial = book.resolve(FontFamily::Arial);
        assert!(matches!(arial, ResolvedFont::Face(_)));
        assert_eq!(book.resolve(FontFamily::Avenir), arial);
        assert_eq!(book.resolve(FontFamily::Verdana), arial);
    }

    #[test]
    fn xml_special_characters_are_escaped() {
        assert_eq!(xml_escape("a<b & \"c\""), "a&lt;b &amp; &quot;c&quot;");
    }
}
