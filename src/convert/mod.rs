//! Media conversion to GIF
//!
//! Routes each attachment to one of three transcoders based on its declared
//! media kind: still images are resized and quantized, animated GIFs are
//! normalized, and videos go through an external two-pass encoder.

pub mod gif;
pub mod image;
pub mod mock;
pub mod processor;
pub mod video;

pub use self::gif::normalize_gif;
pub use self::image::ImageTranscoder;
pub use mock::MockConverter;
pub use processor::MediaConverter;
pub use video::{VideoConfig, VideoTranscoder};

use crate::models::MediaKind;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;

#[async_trait]
pub trait ConvertService: Send + Sync {
    async fn convert(&self, kind: MediaKind, data: Bytes) -> Result<Bytes>;
}
