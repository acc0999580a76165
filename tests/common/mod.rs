//! Fixture builders shared by the integration tests

#![allow(dead_code)]

use filetime::FileTime;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use photo_archive::IngestConfig;

/// 2024-01-15T12:00:00Z
pub const JAN_2024: i64 = 1_705_320_000;

/// Small deterministic config so tests don't depend on the host's core count
pub fn test_config() -> IngestConfig {
    IngestConfig {
        workers: 2,
        ..IngestConfig::default()
    }
}

/// Gradient image; `seed` changes every pixel so different seeds hash apart
pub fn encoded(width: u32, height: u32, seed: u8, format: ImageFormat) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x % 256) as u8 ^ seed,
            (y % 256) as u8,
            seed.wrapping_mul(37),
        ])
    }));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), format).unwrap();
    out
}

pub fn jpeg(width: u32, height: u32, seed: u8) -> Vec<u8> {
    encoded(width, height, seed, ImageFormat::Jpeg)
}

pub fn png(width: u32, height: u32, seed: u8) -> Vec<u8> {
    encoded(width, height, seed, ImageFormat::Png)
}

/// Little-endian TIFF holding only `DateTimeOriginal` in the Exif IFD
pub fn exif_tiff(date_time_original: &str) -> Vec<u8> {
    let exif_ifd_offset: u32 = 8 + 2 + 12 + 4;
    let data_offset: u32 = exif_ifd_offset + 2 + 12 + 4;
    let mut value = date_time_original.as_bytes().to_vec();
    value.push(0);

    let mut tiff = b"II".to_vec();
    tiff.extend_from_slice(&42u16.to_le_bytes());
    tiff.extend_from_slice(&8u32.to_le_bytes());
    // IFD0: one entry pointing at the Exif IFD
    tiff.extend_from_slice(&1u16.to_le_bytes());
    tiff.extend_from_slice(&0x8769u16.to_le_bytes());
    tiff.extend_from_slice(&4u16.to_le_bytes());
    tiff.extend_from_slice(&1u32.to_le_bytes());
    tiff.extend_from_slice(&exif_ifd_offset.to_le_bytes());
    tiff.extend_from_slice(&0u32.to_le_bytes());
    // Exif IFD: DateTimeOriginal (ASCII)
    tiff.extend_from_slice(&1u16.to_le_bytes());
    tiff.extend_from_slice(&0x9003u16.to_le_bytes());
    tiff.extend_from_slice(&2u16.to_le_bytes());
    tiff.extend_from_slice(&(value.len() as u32).to_le_bytes());
    tiff.extend_from_slice(&data_offset.to_le_bytes());
    tiff.extend_from_slice(&0u32.to_le_bytes());
    tiff.extend_from_slice(&value);
    tiff
}

/// A JPEG with an APP1 Exif segment right after SOI
pub fn jpeg_with_capture_date(width: u32, height: u32, seed: u8, date_time_original: &str) -> Vec<u8> {
    let plain = jpeg(width, height, seed);
    let tiff = exif_tiff(date_time_original);

    let mut payload = b"Exif\0\0".to_vec();
    payload.extend_from_slice(&tiff);
    let segment_len = (payload.len() + 2) as u16;

    let mut out = plain[..2].to_vec();
    out.extend_from_slice(&[0xff, 0xe1]);
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&plain[2..]);
    out
}

/// Write `bytes` to `dir/rel`, creating parents, and pin its mtime
pub fn put(dir: &Path, rel: &str, bytes: &[u8], mtime: i64) -> PathBuf {
    let path = dir.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, bytes).unwrap();
    filetime::set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).unwrap();
    path
}

/// Every file under the archive outside `.meta`, archive-relative and sorted
pub fn archive_files(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".meta")
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    files.sort();
    files
}
