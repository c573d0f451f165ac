//! Video → GIF through a two-pass ffmpeg pipeline.
//!
//! Pass 1 samples the clip and generates an optimized palette image; pass 2
//! re-samples the same window and maps it onto that palette with ordered
//! dithering. Input, palette and output live in temporary files owned by a
//! single [`TempAssets`] value, so they are removed whenever the conversion
//! future finishes, fails, times out or is dropped. Encoder processes are
//! spawned with `kill_on_drop`, so dropping the future also stops them.

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempPath;
use tokio::process::Command;

/// Longest stderr excerpt kept in error messages.
const STDERR_TAIL: usize = 2048;

#[derive(Debug, Clone)]
pub struct VideoConfig {
    pub ffmpeg_path: PathBuf,
    /// Only this many seconds from the start of the source are converted.
    pub clip_seconds: u32,
    pub palette_fps: u32,
    pub output_fps: u32,
    /// Output width in pixels; height follows the aspect ratio.
    pub width: u32,
    /// Wall-clock limit for each encoder invocation.
    pub process_timeout: Duration,
    /// Directory for the scoped temp files; system temp dir when `None`.
    pub temp_dir: Option<PathBuf>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            clip_seconds: 10,
            palette_fps: 12,
            output_fps: 8,
            width: 480,
            process_timeout: Duration::from_secs(60),
            temp_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Palette,
    Encode,
}

impl Pass {
    fn error(self, message: String) -> Error {
        match self {
            Pass::Palette => Error::PaletteGen(message),
            Pass::Encode => Error::Encode(message),
        }
    }
}

/// The three scoped files of one conversion. Dropping this removes them.
pub struct TempAssets {
    input: TempPath,
    palette: TempPath,
    output: TempPath,
}

impl TempAssets {
    pub fn create(dir: Option<&Path>) -> Result<Self> {
        Ok(Self {
            input: temp_path(dir, "input-", ".mp4")?,
            palette: temp_path(dir, "palette-", ".png")?,
            output: temp_path(dir, "output-", ".gif")?,
        })
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn palette(&self) -> &Path {
        &self.palette
    }

    pub fn output(&self) -> &Path {
        &self.output
    }
}

fn temp_path(dir: Option<&Path>, prefix: &str, suffix: &str) -> Result<TempPath> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix).suffix(suffix);
    let file = match dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };
    Ok(file.into_temp_path())
}

pub struct VideoTranscoder {
    config: VideoConfig,
}

impl VideoTranscoder {
    pub fn new(config: VideoConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(VideoConfig::default())
    }

    pub fn config(&self) -> &VideoConfig {
        &self.config
    }

    fn scale_filter(&self, fps: u32) -> String {
        format!("fps={},scale={}:-1:flags=lanczos", fps, self.config.width)
    }

    fn palette_args(&self, input: &Path, palette: &Path) -> Vec<String> {
        vec![
            "-t".to_string(),
            self.config.clip_seconds.to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-vf".to_string(),
            format!("{},palettegen", self.scale_filter(self.config.palette_fps)),
            "-y".to_string(),
            palette.to_string_lossy().to_string(),
        ]
    }

    fn encode_args(&self, input: &Path, palette: &Path, output: &Path) -> Vec<String> {
        vec![
            "-t".to_string(),
            self.config.clip_seconds.to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-i".to_string(),
            palette.to_string_lossy().to_string(),
            "-lavfi".to_string(),
            format!(
                "{}[x];[x][1:v]paletteuse=dither=bayer:bayer_scale=3",
                self.scale_filter(self.config.output_fps)
            ),
            "-y".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }

    async fn run_ffmpeg(&self, args: &[String], pass: Pass) -> Result<()> {
        let child = Command::new(&self.config.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                pass.error(format!(
                    "failed to start {}: {}",
                    self.config.ffmpeg_path.display(),
                    e
                ))
            })?;

        // On timeout the child is dropped with the future and killed.
        let output = tokio::time::timeout(self.config.process_timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::Timeout(self.config.process_timeout.as_secs()))??;

        if !output.status.success() {
            return Err(pass.error(format!(
                "ffmpeg exited with {}\n{}",
                output.status,
                stderr_tail(&output.stderr)
            )));
        }

        Ok(())
    }

    /// Converts the first `clip_seconds` of `data` into a GIF.
    pub async fn transcode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let assets = TempAssets::create(self.config.temp_dir.as_deref())?;

        tokio::fs::write(assets.input(), data).await?;

        tracing::debug!("Generating palette for {} byte video", data.len());
        self.run_ffmpeg(
            &self.palette_args(assets.input(), assets.palette()),
            Pass::Palette,
        )
        .await?;

        tracing::debug!("Encoding GIF with generated palette");
        self.run_ffmpeg(
            &self.encode_args(assets.input(), assets.palette(), assets.output()),
            Pass::Encode,
        )
        .await?;

        let gif = tokio::fs::read(assets.output()).await?;
        if gif.is_empty() {
            return Err(Error::Encode("encoder produced an empty file".to_string()));
        }

        Ok(gif)
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let chars = text.chars().count();
    if chars <= STDERR_TAIL {
        return text.to_string();
    }
    match text.char_indices().nth(chars - STDERR_TAIL) {
        Some((cut, _)) => format!("...{}", &text[cut..]),
        None => text.to_string(),
    }
}
