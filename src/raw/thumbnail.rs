use exif::{Exif, In, Tag};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops::FilterType, DynamicImage};
use std::fs;
use std::path::{Path, PathBuf};

use super::preview;
use crate::config::ThumbnailConfig;
use crate::error::ThumbnailError;
use crate::state::data::{thumb_path_for, ThumbDims};

/// A thumbnail pair rendered in memory, not yet on disk
#[derive(Debug, Clone)]
pub struct RenderedThumbnail {
    pub webp: Vec<u8>,
    pub jpeg: Vec<u8>,
    pub dims: ThumbDims,
}

/// Absolute locations of the two renditions for one archived original
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbPaths {
    pub webp: PathBuf,
    pub jpeg: PathBuf,
}

impl ThumbPaths {
    /// Both renditions for `dest_path` (archive-relative, `/`-separated)
    pub fn for_dest(archive_root: &Path, dest_path: &str) -> Self {
        Self {
            webp: archive_root.join(thumb_path_for(dest_path, "webp")),
            jpeg: archive_root.join(thumb_path_for(dest_path, "jpeg")),
        }
    }

    pub fn any_exists(&self) -> bool {
        self.webp.exists() || self.jpeg.exists()
    }

    pub fn both_exist(&self) -> bool {
        self.webp.exists() && self.jpeg.exists()
    }

    /// Best-effort removal of both files
    pub fn remove(&self) {
        for path in [&self.webp, &self.jpeg] {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove thumbnail");
                }
            }
        }
    }
}

/// Result of writing a thumbnail pair
#[derive(Debug, Clone)]
pub struct WrittenThumbnail {
    pub paths: ThumbPaths,
    pub dims: ThumbDims,
    /// False when existing files were kept
    pub created: bool,
}

/// EXIF orientation tag value for an upright image
pub const UPRIGHT: u32 = 1;

/// Raw EXIF orientation tag (1..=8), [`UPRIGHT`] when absent
pub fn exif_orientation(exif: &Exif) -> u32 {
    exif.get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .unwrap_or(UPRIGHT)
}

/// Rotate/flip decoded pixels so they display upright. Unknown tag values
/// leave the image untouched.
pub fn orient(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.fliph().rotate270(),
        6 => img.rotate90(),
        7 => img.fliph().rotate90(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Scale `(width, height)` to fit inside a `max_edge` square, keeping aspect
/// ratio. Images already inside the box are never enlarged.
pub fn fit_within(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    if width <= max_edge && height <= max_edge {
        return (width, height);
    }

    let scale = |short: u32, long: u32| -> u32 {
        let scaled = (short as u64 * max_edge as u64 + long as u64 / 2) / long as u64;
        (scaled as u32).clamp(1, max_edge)
    };

    if width >= height {
        (max_edge, scale(height, width))
    } else {
        (scale(width, height), max_edge)
    }
}

/// Decode original bytes. RAW files go through their embedded preview.
pub fn decode(bytes: &[u8], is_raw: bool) -> Result<DynamicImage, ThumbnailError> {
    if is_raw {
        return preview::decode_largest_preview(bytes).ok_or(ThumbnailError::NoEmbeddedPreview);
    }
    image::load_from_memory(bytes).map_err(ThumbnailError::Decode)
}

/// Orient, resize and encode both renditions in memory
pub fn render(
    bytes: &[u8],
    is_raw: bool,
    orientation: u32,
    config: &ThumbnailConfig,
) -> Result<RenderedThumbnail, ThumbnailError> {
    let img = orient(decode(bytes, is_raw)?, orientation);

    let (width, height) = fit_within(img.width(), img.height(), config.max_edge);
    let thumb = if (width, height) == (img.width(), img.height()) {
        img
    } else {
        img.resize_exact(width, height, FilterType::Lanczos3)
    };

    Ok(RenderedThumbnail {
        webp: encode_webp(&thumb, config.webp_quality)?,
        jpeg: encode_jpeg(&thumb, config.jpeg_quality)?,
        dims: ThumbDims { width, height },
    })
}

fn encode_webp(img: &DynamicImage, quality: f32) -> Result<Vec<u8>, ThumbnailError> {
    // libwebp only takes 8-bit RGB or RGBA
    let img = if img.color().has_alpha() {
        DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8())
    };
    let encoder = webp::Encoder::from_image(&img)
        .map_err(|reason| ThumbnailError::WebpEncode(reason.to_string()))?;
    let memory = encoder
        .encode_simple(false, quality)
        .map_err(|reason| ThumbnailError::WebpEncode(format!("{reason:?}")))?;
    Ok(memory.to_vec())
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ThumbnailError> {
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, quality);
    DynamicImage::ImageRgb8(img.to_rgb8())
        .write_with_encoder(encoder)
        .map_err(ThumbnailError::JpegEncode)?;
    Ok(out)
}

/// Write a rendered pair beside `dest_path`'s mirror under `thumbs/`.
/// If both files already exist they are kept and their dimensions read back.
pub fn write(
    archive_root: &Path,
    dest_path: &str,
    rendered: &RenderedThumbnail,
) -> Result<WrittenThumbnail, ThumbnailError> {
    let paths = ThumbPaths::for_dest(archive_root, dest_path);
    if let Some(dims) = existing_dims(&paths) {
        return Ok(WrittenThumbnail {
            paths,
            dims,
            created: false,
        });
    }

    if let Some(parent) = paths.webp.parent() {
        fs::create_dir_all(parent).map_err(|source| ThumbnailError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let result = fs::write(&paths.webp, &rendered.webp)
        .map_err(|source| ThumbnailError::Write {
            path: paths.webp.clone(),
            source,
        })
        .and_then(|()| {
            fs::write(&paths.jpeg, &rendered.jpeg).map_err(|source| ThumbnailError::Write {
                path: paths.jpeg.clone(),
                source,
            })
        });
    if let Err(e) = result {
        paths.remove();
        return Err(e);
    }

    Ok(WrittenThumbnail {
        paths,
        dims: rendered.dims,
        created: true,
    })
}

/// Full derivation for an already-archived original: skip entirely when the
/// thumbnails exist, otherwise read EXIF, render, and write.
pub fn derive(
    archive_root: &Path,
    dest_path: &str,
    bytes: &[u8],
    config: &ThumbnailConfig,
) -> Result<WrittenThumbnail, ThumbnailError> {
    let paths = ThumbPaths::for_dest(archive_root, dest_path);
    if let Some(dims) = existing_dims(&paths) {
        return Ok(WrittenThumbnail {
            paths,
            dims,
            created: false,
        });
    }

    let orientation = super::read_exif(bytes)
        .map(|exif| exif_orientation(&exif))
        .unwrap_or(UPRIGHT);
    let rendered = render(bytes, super::is_raw(Path::new(dest_path)), orientation, config)?;
    write(archive_root, dest_path, &rendered)
}

fn existing_dims(paths: &ThumbPaths) -> Option<ThumbDims> {
    if !paths.both_exist() {
        return None;
    }
    let (width, height) = image::image_dimensions(&paths.webp).ok()?;
    Some(ThumbDims { width, height })
}
