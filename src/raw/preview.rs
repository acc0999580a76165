//! Embedded preview extraction for RAW files
//!
//! Camera RAW containers (CR2, NEF) carry one or more baseline JPEG
//! previews next to the sensor data. We can't decode the sensor data
//! directly, so thumbnails are rendered from the largest preview that
//! actually decodes.

use image::{DynamicImage, ImageFormat};

const JPEG_START: &[u8] = b"\xff\xd8\xff"; // JPEG Start Of Image (SOI)
const JPEG_END: &[u8] = b"\xff\xd9"; // JPEG End Of Image (EOI)

/// Return every SOI..EOI span in `buffer`, largest first
pub fn embedded_jpegs(buffer: &[u8]) -> Vec<&[u8]> {
    let mut found = Vec::new();

    let mut pos = 0;
    while pos + JPEG_START.len() <= buffer.len() {
        if !buffer[pos..].starts_with(JPEG_START) {
            pos += 1;
            continue;
        }

        // Find the corresponding EOI
        match buffer[pos..]
            .windows(JPEG_END.len())
            .position(|w| w == JPEG_END)
        {
            Some(offset) => {
                let end = pos + offset + JPEG_END.len();
                found.push(&buffer[pos..end]);
                pos = end;
            }
            None => break,
        }
    }

    found.sort_by(|a, b| b.len().cmp(&a.len()));
    found
}

/// Decode the largest embedded JPEG that the decoder accepts
pub fn decode_largest_preview(buffer: &[u8]) -> Option<DynamicImage> {
    for jpeg in embedded_jpegs(buffer) {
        match image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg) {
            Ok(img) => {
                tracing::debug!(
                    size_kb = jpeg.len() / 1024,
                    width = img.width(),
                    height = img.height(),
                    "Decoded embedded preview"
                );
                return Some(img);
            }
            Err(e) => tracing::trace!(size = jpeg.len(), error = %e, "Skipping undecodable preview"),
        }
    }
    None
}
