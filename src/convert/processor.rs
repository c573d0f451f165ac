use super::{normalize_gif, ConvertService, ImageTranscoder, VideoTranscoder};
use crate::models::MediaKind;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;

pub struct MediaConverter {
    image: ImageTranscoder,
    video: VideoTranscoder,
}

impl MediaConverter {
    pub fn new(image: ImageTranscoder, video: VideoTranscoder) -> Self {
        Self { image, video }
    }

    async fn run_blocking<F>(task: F) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Result<Vec<u8>> + Send + 'static,
    {
        tokio::task::spawn_blocking(task)
            .await
            .map_err(|e| Error::Invariant(format!("Conversion task join error: {}", e)))?
    }
}

#[async_trait]
impl ConvertService for MediaConverter {
    async fn convert(&self, kind: MediaKind, data: Bytes) -> Result<Bytes> {
        let gif = match kind {
            MediaKind::Image => {
                let transcoder = self.image.clone();
                Self::run_blocking(move || transcoder.transcode(&data)).await?
            }
            MediaKind::AnimatedGif => Self::run_blocking(move || normalize_gif(&data)).await?,
            MediaKind::Video => self.video.transcode(&data).await?,
            MediaKind::Unsupported => {
                return Err(Error::Unsupported(
                    "no transcoder for this content type".to_string(),
                ))
            }
        };

        Ok(Bytes::from(gif))
    }
}
