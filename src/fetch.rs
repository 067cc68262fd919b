//! Source image retrieval.
//!
//! Templates and foreground layers are referenced by URL or local path:
//!
//! | Reference | Transport |
//! |---|---|
//! | `http://…`, `https://…` | blocking `reqwest` GET with a timeout |
//! | `file:///…` or a plain path | `std::fs::read` |
//!
//! Bytes are decoded with the `image` crate and EXIF orientation is applied
//! so sideways phone photos arrive upright. Any failure here is fatal for the
//! job.

use image::{DynamicImage, ImageDecoder, ImageReader};
use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("timed out fetching {0}")]
    Timeout(String),
    #[error("{source_ref} returned HTTP {status}")]
    Status { source_ref: String, status: u16 },
    #[error("request to {source_ref} failed: {message}")]
    Http { source_ref: String, message: String },
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot decode {source_ref}: {source}")]
    Decode {
        source_ref: String,
        #[source]
        source: image::ImageError,
    },
}

/// Resolves a source reference to a decoded image.
///
/// `Sync` so one fetcher can serve rayon's parallel layer loading.
pub trait SourceFetcher: Sync {
    fn fetch(&self, source: &str) -> Result<DynamicImage, FetchError>;
}

/// HTTP(S) and local-file fetcher used in production.
pub struct DefaultFetcher {
    client: reqwest::blocking::Client,
}

impl DefaultFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Http {
                source_ref: "client".to_string(),
                message: e.to_string(),
            })?;
        Ok(Self::from_client(client))
    }

    /// Wrap a preconfigured client (proxy, TLS or timeout settings).
    pub fn from_client(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }

    fn fetch_http(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().map_err(|e| classify(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                source_ref: url.to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().map_err(|e| classify(url, e))?;
        Ok(bytes.to_vec())
    }
}

impl SourceFetcher for DefaultFetcher {
    fn fetch(&self, source: &str) -> Result<DynamicImage, FetchError> {
        let bytes = if is_remote(source) {
            self.fetch_http(source)?
        } else {
            let path = local_path(source);
            std::fs::read(&path).map_err(|e| FetchError::Io { path, source: e })?
        };
        tracing::debug!(source, bytes = bytes.len(), "fetched source");
        decode_image(source, &bytes)
    }
}

fn classify(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(url.to_string())
    } else {
        FetchError::Http {
            source_ref: url.to_string(),
            message: err.to_string(),
        }
    }
}

fn is_remote(source: &str) -> bool {
    let lower = source.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Filesystem path for a `file://` URL or plain path.
pub fn local_path(source: &str) -> PathBuf {
    PathBuf::from(source.strip_prefix("file://").unwrap_or(source))
}

/// Decode image bytes, guessing the format and applying EXIF orientation.
pub fn decode_image(source_ref: &str, bytes: &[u8]) -> Result<DynamicImage, FetchError> {
    let decode_err = |source: image::ImageError| FetchError::Decode {
        source_ref: source_ref.to_string(),
        source,
    };
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| decode_err(image::ImageError::IoError(e)))?;
    let mut decoder = reader.into_decoder().map_err(decode_err)?;
    let orientation = decoder.orientation().map_err(decode_err)?;
    let mut image = DynamicImage::from_decoder(decoder).map_err(decode_err)?;
    image.apply_orientation(orientation);
    Ok(image)
}
