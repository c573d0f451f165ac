//! Error handling and custom error types
//!
//! Provides unified error handling across the conversion pipeline using thiserror.
//! Every variant is task-local: a failing attachment never aborts its siblings.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Palette generation error: {0}")]
    PaletteGen(String),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Replication error: {0}")]
    Replication(String),

    #[error("Unsupported media type: {0}")]
    Unsupported(String),

    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    #[error("Conversion cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] dotenvy::Error),

    #[error("Invariant violated: {0}")]
    Invariant(String),
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::Encoding(e) => Error::Encode(e.to_string()),
            image::ImageError::IoError(e) => Error::Io(e),
            other => Error::Decode(other.to_string()),
        }
    }
}

impl Error {
    /// Coarse label used when counting failures on the metrics sink.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Http(_) | Error::Fetch(_) => "fetch",
            Error::Decode(_) => "decode",
            Error::Encode(_) => "encode",
            Error::PaletteGen(_) => "palette",
            Error::Upload(_) => "upload",
            Error::Replication(_) => "replication",
            Error::Unsupported(_) => "unsupported",
            Error::Timeout(_) => "timeout",
            Error::Cancelled => "cancelled",
            Error::Config(_) | Error::EnvVar(_) => "config",
            Error::Invariant(_) => "invariant",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_errors_map_to_decode() {
        let err = image::load_from_memory(b"definitely not an image").unwrap_err();
        let err: Error = err.into();
        assert!(matches!(err, Error::Decode(_)));
        assert_eq!(err.reason(), "decode");
    }

    #[test]
    fn test_reason_labels() {
        assert_eq!(Error::PaletteGen("x".into()).reason(), "palette");
        assert_eq!(Error::Timeout(5).reason(), "timeout");
        assert_eq!(Error::Cancelled.reason(), "cancelled");
        assert_eq!(Error::Upload("503".into()).reason(), "upload");
    }
}
