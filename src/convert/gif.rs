//! Animated GIF normalization.
//!
//! Decodes every frame of an uploaded GIF and writes the same frames back out.
//! Frame pixels, palettes, delays and disposal methods pass through untouched;
//! only the container encoding is rebuilt. Anything that is not a well-formed
//! GIF (for example an HTML page served behind a `.gif` link) fails here.

use crate::{Error, Result};
use std::io::Cursor;

pub fn normalize_gif(data: &[u8]) -> Result<Vec<u8>> {
    let mut options = gif::DecodeOptions::new();
    options.set_color_output(gif::ColorOutput::Indexed);

    let mut decoder = options
        .read_info(Cursor::new(data))
        .map_err(|e| Error::Decode(format!("not a valid GIF: {}", e)))?;

    let width = decoder.width();
    let height = decoder.height();
    let repeat = decoder.repeat();
    let global_palette = decoder
        .global_palette()
        .map(<[u8]>::to_vec)
        .unwrap_or_default();

    let mut frames = Vec::new();
    while let Some(frame) = decoder
        .read_next_frame()
        .map_err(|e| Error::Decode(format!("corrupt GIF frame {}: {}", frames.len(), e)))?
    {
        frames.push(frame.clone());
    }

    if frames.is_empty() {
        return Err(Error::Decode("GIF contains no frames".to_string()));
    }

    let mut output = Vec::with_capacity(data.len());
    {
        let mut encoder = gif::Encoder::new(&mut output, width, height, &global_palette)
            .map_err(|e| Error::Encode(e.to_string()))?;
        encoder
            .set_repeat(repeat)
            .map_err(|e| Error::Encode(e.to_string()))?;

        for frame in &frames {
            encoder
                .write_frame(frame)
                .map_err(|e| Error::Encode(e.to_string()))?;
        }
    }

    tracing::debug!(
        "Normalized GIF with {} frames ({} -> {} bytes)",
        frames.len(),
        data.len(),
        output.len()
    );

    Ok(output)
}
