use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImagingError {
    #[error("invalid geometry: {width}x{height} {context}")]
    InvalidGeometry {
        width: u32,
        height: u32,
        context: &'static str,
    },
    #[error("invalid text layer: {0}")]
    InvalidText(String),
    #[error("invalid colour '{0}': expected 6 hex digits")]
    InvalidColor(String),
    #[error("encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

impl ImagingError {
    pub(crate) fn geometry(width: u32, height: u32, context: &'static str) -> Self {
        ImagingError::InvalidGeometry {
            width,
            height,
            context,
        }
    }
}
