//! Shared data structures for the catalog
//!
//! These structs represent the data model that flows between
//! the ingest pipeline, the database layer, and downstream readers.

use chrono::{DateTime, Datelike, FixedOffset};
use serde::{Deserialize, Serialize};

/// Root directory (relative to the archive root) for derived thumbnails
pub const THUMBS_DIR: &str = "thumbs";

/// Pixel dimensions of a derived thumbnail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbDims {
    pub width: u32,
    pub height: u32,
}

/// One archived photo, keyed by the digest of its bytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    /// Hex SHA-256 of the original bytes
    pub content_hash: String,
    /// Absolute source path at ingestion time (informational only)
    pub source_path: String,
    /// Resolved capture timestamp
    pub capture_date: DateTime<FixedOffset>,
    pub year: i32,
    pub month: u32,
    /// Archive-relative path of the copied original, always `/`-separated
    pub dest_path: String,
    /// None until thumbnail derivation succeeds
    pub thumb: Option<ThumbDims>,
}

impl CatalogEntry {
    /// Build an entry whose `year`/`month` are taken from `capture_date`
    pub fn new(
        content_hash: String,
        source_path: String,
        capture_date: DateTime<FixedOffset>,
        dest_path: String,
        thumb: Option<ThumbDims>,
    ) -> Self {
        Self {
            content_hash,
            source_path,
            year: capture_date.year(),
            month: capture_date.month(),
            capture_date,
            dest_path,
            thumb,
        }
    }

    /// Archive-relative path of the WebP thumbnail
    pub fn thumb_webp_path(&self) -> String {
        thumb_path_for(&self.dest_path, "webp")
    }

    /// Archive-relative path of the JPEG fallback thumbnail
    pub fn thumb_jpeg_path(&self) -> String {
        thumb_path_for(&self.dest_path, "jpeg")
    }
}

/// `2023/05/IMG_0001.jpg` -> `thumbs/2023/05/IMG_0001.<ext>`
pub fn thumb_path_for(dest_path: &str, ext: &str) -> String {
    let (dir, file) = match dest_path.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, dest_path),
    };
    let (stem, _) = split_file_name(file);
    match dir {
        Some(dir) => format!("{THUMBS_DIR}/{dir}/{stem}.{ext}"),
        None => format!("{THUMBS_DIR}/{stem}.{ext}"),
    }
}

/// Split a file name into stem and extension the way `Path::file_stem` does:
/// a leading dot belongs to the stem.
pub fn split_file_name(file: &str) -> (&str, Option<&str>) {
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (file, None),
    }
}
