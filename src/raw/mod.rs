//! Image decoding and thumbnail derivation
//!
//! This module handles:
//! - Reading EXIF from original bytes
//! - Correcting orientation
//! - Extracting embedded JPEG previews from RAW files
//! - Rendering and writing WebP/JPEG thumbnails

pub mod preview;
pub mod thumbnail;

use std::io::Cursor;
use std::path::Path;

/// Extensions whose pixels are only reachable through an embedded preview
pub const RAW_EXTENSIONS: &[&str] = &["cr2", "nef"];

/// Parse the EXIF block of any container kamadak-exif understands
/// (JPEG, TIFF-based RAW, HEIF, PNG, WebP).
pub fn read_exif(bytes: &[u8]) -> Result<exif::Exif, exif::Error> {
    exif::Reader::new().read_from_container(&mut Cursor::new(bytes))
}

/// True for camera RAW files, compared case-insensitively
pub fn is_raw(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| RAW_EXTENSIONS.contains(&ext.as_str()))
}
