//! Still image → single-frame GIF.
//!
//! Resize policy: images whose longer side exceeds the bound (512 px by default)
//! are scaled down so the longer side equals the bound; smaller images keep
//! their dimensions. The palette is built from the most frequent colors.

use crate::{Error, Result};
use image::imageops::FilterType;
use image::RgbaImage;
use std::borrow::Cow;
use std::collections::HashMap;

pub const DEFAULT_MAX_DIMENSION: u32 = 512;

/// GIF palettes hold at most 256 entries.
const MAX_PALETTE: usize = 256;

/// Pixels below this alpha become the transparent index.
const ALPHA_THRESHOLD: u8 = 128;

#[derive(Debug, Clone)]
pub struct ImageTranscoder {
    max_dimension: Option<u32>,
    palette_size: usize,
}

impl Default for ImageTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageTranscoder {
    pub fn new() -> Self {
        Self {
            max_dimension: Some(DEFAULT_MAX_DIMENSION),
            palette_size: 0,
        }
    }

    /// `None` disables resizing entirely.
    pub fn with_max_dimension(mut self, max_dimension: Option<u32>) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    /// Number of palette colors; 0 picks automatically.
    pub fn with_palette_size(mut self, palette_size: usize) -> Self {
        self.palette_size = palette_size;
        self
    }

    /// Decodes `data` (format sniffed from the bytes) and re-encodes it as a GIF.
    ///
    /// CPU-bound; callers on the async runtime should use `spawn_blocking`.
    pub fn transcode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let decoded = image::load_from_memory(data)?;
        let mut rgba = decoded.to_rgba8();

        if rgba.width() == 0 || rgba.height() == 0 {
            return Err(Error::Decode("image has no pixels".to_string()));
        }

        if let Some(bound) = self.max_dimension {
            let (width, height) = target_dimensions(rgba.width(), rgba.height(), bound);
            if (width, height) != rgba.dimensions() {
                tracing::debug!(
                    "Resizing {}x{} to {}x{}",
                    rgba.width(),
                    rgba.height(),
                    width,
                    height
                );
                rgba = image::imageops::resize(&rgba, width, height, FilterType::Lanczos3);
            }
        }

        let quantized = quantize_most_common(&rgba, self.palette_size);
        encode_single_frame(rgba.width(), rgba.height(), quantized)
    }
}

/// Output size for a `width`×`height` image capped at `bound` on its longer side.
pub fn target_dimensions(width: u32, height: u32, bound: u32) -> (u32, u32) {
    if width <= bound && height <= bound {
        return (width, height);
    }

    let scale = |shorter: u32, longer: u32| -> u32 {
        let scaled = (shorter as f64 * (bound as f64 / longer as f64)).round() as u32;
        scaled.max(1)
    };

    if width >= height {
        (bound, scale(height, width))
    } else {
        (scale(width, height), bound)
    }
}

/// Indexed pixels plus the RGB palette they point into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quantized {
    pub palette: Vec<[u8; 3]>,
    pub indices: Vec<u8>,
    pub transparent: Option<u8>,
}

/// Builds a palette from the `n` most frequent opaque colors (`n == 0` means as
/// many as fit) and maps each pixel to its nearest entry.
pub fn quantize_most_common(image: &RgbaImage, n: usize) -> Quantized {
    let mut histogram: HashMap<[u8; 3], u32> = HashMap::new();
    let mut has_transparency = false;

    for pixel in image.pixels() {
        let [r, g, b, a] = pixel.0;
        if a < ALPHA_THRESHOLD {
            has_transparency = true;
        } else {
            *histogram.entry([r, g, b]).or_insert(0) += 1;
        }
    }

    let slots = MAX_PALETTE - usize::from(has_transparency);
    let wanted = if n == 0 { slots } else { n.min(slots) };

    let mut ranked: Vec<([u8; 3], u32)> = histogram.into_iter().collect();
    // Ties broken on the color itself so output is deterministic.
    ranked.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut palette: Vec<[u8; 3]> = ranked.iter().take(wanted).map(|(c, _)| *c).collect();

    let transparent = if has_transparency {
        palette.push([0, 0, 0]);
        Some((palette.len() - 1) as u8)
    } else {
        None
    };

    let opaque_entries = palette.len() - usize::from(has_transparency);
    let mut nearest_cache: HashMap<[u8; 3], u8> = HashMap::new();
    let indices = image
        .pixels()
        .map(|pixel| {
            let [r, g, b, a] = pixel.0;
            match transparent {
                Some(index) if a < ALPHA_THRESHOLD => index,
                _ => *nearest_cache
                    .entry([r, g, b])
                    .or_insert_with(|| nearest(&palette[..opaque_entries], [r, g, b])),
            }
        })
        .collect();

    Quantized {
        palette,
        indices,
        transparent,
    }
}

fn nearest(palette: &[[u8; 3]], color: [u8; 3]) -> u8 {
    let distance = |entry: &[u8; 3]| -> u32 {
        entry
            .iter()
            .zip(color.iter())
            .map(|(a, b)| {
                let d = *a as i32 - *b as i32;
                (d * d) as u32
            })
            .sum()
    };

    palette
        .iter()
        .enumerate()
        .min_by_key(|(_, entry)| distance(entry))
        .map(|(index, _)| index as u8)
        .unwrap_or(0)
}

fn encode_single_frame(width: u32, height: u32, quantized: Quantized) -> Result<Vec<u8>> {
    let width = u16::try_from(width)
        .map_err(|_| Error::Encode(format!("width {} exceeds GIF limits", width)))?;
    let height = u16::try_from(height)
        .map_err(|_| Error::Encode(format!("height {} exceeds GIF limits", height)))?;

    let palette: Vec<u8> = quantized.palette.iter().flatten().copied().collect();

    let mut buffer = Vec::new();
    {
        let mut encoder = gif::Encoder::new(&mut buffer, width, height, &palette)
            .map_err(|e| Error::Encode(e.to_string()))?;

        let frame = gif::Frame {
            width,
            height,
            buffer: Cow::Owned(quantized.indices),
            transparent: quantized.transparent,
            ..gif::Frame::default()
        };

        encoder
            .write_frame(&frame)
            .map_err(|e| Error::Encode(e.to_string()))?;
    }

    Ok(buffer)
}
