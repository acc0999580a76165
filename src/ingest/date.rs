//! Capture date resolution
//!
//! First success wins:
//! 1. EXIF `DateTimeOriginal` (with `OffsetTimeOriginal` when present,
//!    otherwise the wall time is taken as UTC)
//! 2. The file's last-modified time
//!
//! A missing or broken EXIF block only selects the fallback; it is never an
//! error. Failing to stat the file is.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use exif::{Exif, In, Tag, Value};
use std::fs;
use std::path::Path;

use crate::error::{IngestError, IngestResult};

/// Outcome of reading embedded capture metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataResult {
    Found(DateTime<FixedOffset>),
    Unavailable,
}

/// Where a resolved capture date came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSource {
    Exif,
    Modified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureDate {
    pub instant: DateTime<FixedOffset>,
    pub source: DateSource,
}

/// Read the original-capture tag from parsed EXIF
pub fn capture_metadata(exif: Option<&Exif>) -> MetadataResult {
    let Some(exif) = exif else {
        return MetadataResult::Unavailable;
    };
    let Some(raw) = ascii_field(exif, Tag::DateTimeOriginal) else {
        return MetadataResult::Unavailable;
    };
    let Ok(mut stamp) = exif::DateTime::from_ascii(raw) else {
        return MetadataResult::Unavailable;
    };
    if let Some(offset) = ascii_field(exif, Tag::OffsetTimeOriginal) {
        // A malformed offset leaves the stamp in UTC
        let _ = stamp.parse_offset(offset);
    }

    match to_chrono(&stamp) {
        Some(instant) => MetadataResult::Found(instant),
        None => MetadataResult::Unavailable,
    }
}

/// Best-available capture date for `path`
pub fn resolve_capture_date(path: &Path, exif: Option<&Exif>) -> IngestResult<CaptureDate> {
    if let MetadataResult::Found(instant) = capture_metadata(exif) {
        return Ok(CaptureDate {
            instant,
            source: DateSource::Exif,
        });
    }

    tracing::debug!(path = %path.display(), "No capture metadata, using modification time");
    let modified = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|source| IngestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(CaptureDate {
        instant: DateTime::<Utc>::from(modified).fixed_offset(),
        source: DateSource::Modified,
    })
}

fn ascii_field(exif: &Exif, tag: Tag) -> Option<&[u8]> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Ascii(parts) => parts.first().map(Vec::as_slice),
        _ => None,
    }
}

fn to_chrono(stamp: &exif::DateTime) -> Option<DateTime<FixedOffset>> {
    let naive = NaiveDate::from_ymd_opt(
        i32::from(stamp.year),
        u32::from(stamp.month),
        u32::from(stamp.day),
    )?
    .and_hms_opt(
        u32::from(stamp.hour),
        u32::from(stamp.minute),
        u32::from(stamp.second),
    )?;
    let offset_secs = stamp.offset.map_or(0, |minutes| i32::from(minutes) * 60);
    let offset = FixedOffset::east_opt(offset_secs)?;
    naive.and_local_timezone(offset).single()
}
