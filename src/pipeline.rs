//! Composition pipeline.
//!
//! Turns a [`ComposeRequest`] into one JPEG on the remote store:
//!
//! ```text
//! template ──► canvas (RGBA, template size)
//!                │
//! layers[i] ─► crop ─► rotate ─► filter ─► scale ─► watermark ─┐  (parallel, rayon)
//!                │                                             │
//!                ◄──────────── paste in input order ◄──────────┘
//!                │
//! text[j] ─────► render at size × output_width/1000           (input order)
//!                │
//!                ▼
//!          final resize ─► JPEG + DPI ─► staged file ─► upload ─► staged file removed
//! ```
//!
//! Fetch failures, bad geometry and invalid text are fatal for the job and
//! carry the failing layer's index. Retrying is the worker's concern.
//!
//! The separator variant ([`SeparatorRequest`]) skips the template and image
//! layers: a solid background of explicit size carrying text blocks drawn
//! at their declared size.

use crate::fetch::{FetchError, SourceFetcher};
use crate::imaging::{
    self, Filter, FontFamily, HexColor, ImageTransform, ImagingError, Quality, TextLayer,
    TextRenderer, position_px, scale_factor, scaled_font_size,
};
use crate::remote::{self, RemoteError, RemotePath, RemoteStore};
use image::RgbaImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use thiserror::Error;

/// Output density when a request does not name one.
pub const DEFAULT_DPI: u16 = 300;

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("cannot fetch {what}: {source}")]
    Fetch {
        what: String,
        #[source]
        source: FetchError,
    },
    #[error("image layer {index}: {source}")]
    Layer {
        index: usize,
        #[source]
        source: ImagingError,
    },
    #[error("text layer {index}: {source}")]
    Text {
        index: usize,
        #[source]
        source: ImagingError,
    },
    #[error(transparent)]
    Imaging(#[from] ImagingError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("staging failed: {0}")]
    Staging(#[from] std::io::Error),
}

// =============================================================================
// Requests
// =============================================================================

/// One foreground image and its transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageLayer {
    pub source: String,
    #[serde(flatten)]
    pub transform: ImageTransform,
}

/// Image layers given as parallel arrays, one entry per layer.
///
/// Arrays shorter than `sources` are padded with the neutral value for the
/// missing entries: rotation 0, width 100%, no filter, no crop, position 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayerArrays {
    pub sources: Vec<String>,
    pub rotations: Vec<f64>,
    pub widths: Vec<f64>,
    pub filters: Vec<Filter>,
    pub crop_tops: Vec<f64>,
    pub crop_bottoms: Vec<f64>,
    pub x_positions: Vec<f64>,
    pub y_positions: Vec<f64>,
}

impl LayerArrays {
    pub fn into_layers(self) -> Vec<ImageLayer> {
        let neutral = ImageTransform::default();
        self.sources
            .into_iter()
            .enumerate()
            .map(|(i, source)| ImageLayer {
                source,
                transform: ImageTransform {
                    crop_top_pct: pick(&self.crop_tops, i, neutral.crop_top_pct),
                    crop_bottom_pct: pick(&self.crop_bottoms, i, neutral.crop_bottom_pct),
                    rotation_deg: pick(&self.rotations, i, neutral.rotation_deg),
                    filter: pick(&self.filters, i, neutral.filter),
                    width_pct: pick(&self.widths, i, neutral.width_pct),
                    x_pct: pick(&self.x_positions, i, neutral.x_pct),
                    y_pct: pick(&self.y_positions, i, neutral.y_pct),
                },
            })
            .collect()
    }
}

/// Text layers given as parallel arrays. Entries whose text is missing or
/// empty are skipped; other missing values take the text defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TextArrays {
    pub texts: Vec<String>,
    pub fonts: Vec<FontFamily>,
    pub colors: Vec<HexColor>,
    pub sizes: Vec<u32>,
    pub x_positions: Vec<f64>,
    pub y_positions: Vec<f64>,
}

impl TextArrays {
    pub fn into_layers(self) -> Vec<TextLayer> {
        let neutral = TextLayer::new("");
        self.texts
            .into_iter()
            .enumerate()
            .filter(|(_, text)| !text.is_empty())
            .map(|(i, text)| TextLayer {
                font: pick(&self.fonts, i, neutral.font),
                size: pick(&self.sizes, i, neutral.size),
                color: pick(&self.colors, i, neutral.color),
                x_pct: pick(&self.x_positions, i, neutral.x_pct),
                y_pct: pick(&self.y_positions, i, neutral.y_pct),
                ..TextLayer::new(text)
            })
            .collect()
    }
}

fn pick<T: Copy>(values: &[T], index: usize, default: T) -> T {
    values.get(index).copied().unwrap_or(default)
}

fn default_dpi() -> u16 {
    DEFAULT_DPI
}

/// A template composition job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComposeRequest {
    /// Background template reference (URL or path).
    pub template: String,
    #[serde(default)]
    pub layers: Vec<ImageLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_arrays: Option<LayerArrays>,
    #[serde(default)]
    pub text: Vec<TextLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_arrays: Option<TextArrays>,
    /// Final output width; the template width when absent.
    #[serde(default)]
    pub output_width: Option<u32>,
    /// Text stamped diagonally across every foreground layer.
    #[serde(default)]
    pub watermark: Option<String>,
    #[serde(default = "default_dpi")]
    pub dpi: u16,
    /// Remote destination file path.
    pub destination: String,
}

impl ComposeRequest {
    pub fn new(template: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            layers: Vec::new(),
            layer_arrays: None,
            text: Vec::new(),
            text_arrays: None,
            output_width: None,
            watermark: None,
            dpi: DEFAULT_DPI,
            destination: destination.into(),
        }
    }

    /// Explicit layers followed by those given as parallel arrays.
    pub fn image_layers(&self) -> Vec<ImageLayer> {
        let mut layers = self.layers.clone();
        if let Some(arrays) = &self.layer_arrays {
            layers.extend(arrays.clone().into_layers());
        }
        layers
    }

    /// Explicit text layers followed by those given as parallel arrays.
    pub fn text_layers(&self) -> Vec<TextLayer> {
        let mut layers = self.text.clone();
        if let Some(arrays) = &self.text_arrays {
            layers.extend(arrays.clone().into_layers());
        }
        layers
    }
}

/// A separator page: solid background plus text blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeparatorRequest {
    pub background_color: HexColor,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub text: Vec<TextLayer>,
    pub destination: String,
}

/// What was delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub destination: String,
    pub width: u32,
    pub height: u32,
    pub bytes: u64,
}

// =============================================================================
// Composer
// =============================================================================

/// Runs requests against injected collaborators.
pub struct Composer<'a> {
    pub fetcher: &'a dyn SourceFetcher,
    pub renderer: &'a TextRenderer,
    pub store: &'a dyn RemoteStore,
    pub staging_dir: PathBuf,
    pub quality: Quality,
}

impl Composer<'_> {
    /// Build the composed canvas without encoding or delivering it.
    pub fn compose(&self, request: &ComposeRequest) -> Result<RgbaImage, ComposeError> {
        let template = self
            .fetcher
            .fetch(&request.template)
            .map_err(|source| ComposeError::Fetch {
                what: format!("template {}", request.template),
                source,
            })?;
        let mut canvas = template.to_rgba8();
        tracing::debug!(
            width = canvas.width(),
            height = canvas.height(),
            "template loaded"
        );

        compose_layers(
            &mut canvas,
            &request.image_layers(),
            request.watermark.as_deref(),
            self.fetcher,
            self.renderer,
        )?;

        let factor = scale_factor(request.output_width, canvas.width());
        draw_text_layers(&mut canvas, &request.text_layers(), factor, self.renderer)?;

        match request.output_width {
            Some(width) if width != canvas.width() => {
                Ok(imaging::resize_to_width(canvas, width)?)
            }
            _ => Ok(canvas),
        }
    }

    /// Compose, encode and deliver one request.
    #[tracing::instrument(skip_all, fields(destination = %request.destination))]
    pub fn run(&self, request: &ComposeRequest) -> Result<Delivery, ComposeError> {
        tracing::info!(
            template = %request.template,
            layers = request.image_layers().len(),
            texts = request.text_layers().len(),
            output_width = ?request.output_width,
            params = %serde_json::to_string(request).unwrap_or_default(),
            "compose started"
        );
        let result = self.compose(request).and_then(|canvas| {
            let jpeg = imaging::encode_jpeg(&canvas, self.quality, request.dpi)?;
            let bytes = self.deliver_staged(&jpeg, &request.destination)?;
            Ok(Delivery {
                destination: request.destination.clone(),
                width: canvas.width(),
                height: canvas.height(),
                bytes,
            })
        });
        log_outcome(&result);
        result
    }

    /// Render and deliver a separator page at the default DPI.
    #[tracing::instrument(skip_all, fields(destination = %request.destination))]
    pub fn run_separator(&self, request: &SeparatorRequest) -> Result<Delivery, ComposeError> {
        tracing::info!(
            width = request.width,
            height = request.height,
            background = %request.background_color,
            texts = request.text.len(),
            params = %serde_json::to_string(request).unwrap_or_default(),
            "separator started"
        );
        let result = self.render_separator(request).and_then(|canvas| {
            let jpeg = imaging::encode_jpeg(&canvas, self.quality, DEFAULT_DPI)?;
            let bytes = self.deliver_staged(&jpeg, &request.destination)?;
            Ok(Delivery {
                destination: request.destination.clone(),
                width: canvas.width(),
                height: canvas.height(),
                bytes,
            })
        });
        log_outcome(&result);
        result
    }

    pub fn render_separator(&self, request: &SeparatorRequest) -> Result<RgbaImage, ComposeError> {
        if request.width == 0 || request.height == 0 {
            return Err(ImagingError::InvalidGeometry {
                width: request.width,
                height: request.height,
                context: "separator page has no area",
            }
            .into());
        }
        let mut canvas = RgbaImage::from_pixel(
            request.width,
            request.height,
            request.background_color.rgba(255),
        );
        draw_text_layers(&mut canvas, &request.text, 1.0, self.renderer)?;
        Ok(canvas)
    }

    /// Write `bytes` to a staging file, upload it, and remove the staging
    /// file whatever the upload outcome.
    fn deliver_staged(&self, bytes: &[u8], destination: &str) -> Result<u64, ComposeError> {
        let path = RemotePath::parse(destination)?;
        std::fs::create_dir_all(&self.staging_dir)?;
        let mut staged = tempfile::Builder::new()
            .prefix("compose-")
            .suffix(".jpg")
            .tempfile_in(&self.staging_dir)?;
        staged.write_all(bytes)?;
        staged.flush()?;
        staged.as_file_mut().seek(SeekFrom::Start(0))?;
        tracing::debug!(staged = %staged.path().display(), bytes = bytes.len(), "staged output");

        let uploaded = remote::deliver(self.store, &path, staged.as_file_mut());
        if let Err(e) = staged.close() {
            tracing::warn!(error = %e, "cannot remove staged file");
        }
        Ok(uploaded?)
    }
}

fn log_outcome(result: &Result<Delivery, ComposeError>) {
    match result {
        Ok(delivery) => tracing::info!(
            width = delivery.width,
            height = delivery.height,
            bytes = delivery.bytes,
            "delivered"
        ),
        Err(ComposeError::Layer { index, source }) => {
            tracing::error!(index, kind = "image", error = %source, "layer failed")
        }
        Err(ComposeError::Text { index, source }) => {
            tracing::error!(index, kind = "text", error = %source, "layer failed")
        }
        Err(e) => tracing::error!(error = %e, "compose failed"),
    }
}

/// Fetch and transform every layer in parallel, then paste them in order.
///
/// Fails with the lowest failing index; nothing is pasted in that case.
pub fn compose_layers(
    canvas: &mut RgbaImage,
    layers: &[ImageLayer],
    watermark: Option<&str>,
    fetcher: &dyn SourceFetcher,
    renderer: &TextRenderer,
) -> Result<(), ComposeError> {
    let canvas_width = canvas.width();
    let transformed: Vec<Result<RgbaImage, ComposeError>> = layers
        .par_iter()
        .enumerate()
        .map(|(index, layer)| {
            let source = fetcher
                .fetch(&layer.source)
                .map_err(|source| ComposeError::Fetch {
                    what: format!("layer {index} ({})", layer.source),
                    source,
                })?;
            imaging::transform_layer(source, &layer.transform, canvas_width, watermark, renderer)
                .map_err(|source| ComposeError::Layer { index, source })
        })
        .collect();

    let ready = transformed.into_iter().collect::<Result<Vec<_>, _>>()?;
    let (width, height) = canvas.dimensions();
    for (layer, image) in layers.iter().zip(&ready) {
        let origin = (
            position_px(layer.transform.x_pct, width),
            position_px(layer.transform.y_pct, height),
        );
        tracing::debug!(
            source = %layer.source,
            x = origin.0,
            y = origin.1,
            w = image.width(),
            h = image.height(),
            "paste layer"
        );
        imaging::paste(canvas, image, origin);
    }
    Ok(())
}

/// Draw text layers in order with sizes multiplied by `factor`.
pub fn draw_text_layers(
    canvas: &mut RgbaImage,
    layers: &[TextLayer],
    factor: f64,
    renderer: &TextRenderer,
) -> Result<(), ComposeError> {
    for (index, layer) in layers.iter().enumerate() {
        let size = scaled_font_size(layer.size, factor);
        renderer
            .render(canvas, layer, size)
            .map_err(|source| ComposeError::Text { index, source })?;
    }
    Ok(())
}
