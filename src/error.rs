//! Error types for the ingestion pipeline
//!
//! Errors fall in two groups. Per-file errors are caught by the orchestrator,
//! reported with the offending path, and the run moves on. Run-fatal errors
//! are preconditions (archive root, catalog, lock, config) and abort the run.

use std::path::PathBuf;
use thiserror::Error;

/// Catalog store failures
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to create catalog directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("catalog database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A row with the same content hash or destination path is already stored
    #[error("catalog already holds {hash} or destination {dest_path}")]
    Duplicate { hash: String, dest_path: String },

    #[error("catalog row has an invalid capture date {value:?}: {reason}")]
    InvalidDate { value: String, reason: String },

    #[error("catalog handle poisoned by a panicked writer")]
    Poisoned,
}

/// Thumbnail derivation failures
#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("cannot decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("no decodable embedded preview in RAW file")]
    NoEmbeddedPreview,

    #[error("WebP encoding failed: {0}")]
    WebpEncode(String),

    #[error("JPEG encoding failed: {0}")]
    JpegEncode(#[source] image::ImageError),

    #[error("failed to write thumbnail {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Configuration loading failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything that can go wrong during an ingest run
#[derive(Debug, Error)]
pub enum IngestError {
    // ========== Run-fatal ==========
    #[error("source path not found: {0}")]
    SourceMissing(PathBuf),

    #[error("archive root {path} is not writable: {source}")]
    ArchiveUnwritable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("archive root {0} is locked by another ingest")]
    ArchiveLocked(PathBuf),

    #[error(transparent)]
    Config(#[from] ConfigError),

    // ========== Per-file ==========
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to thumbnail {path}: {source}")]
    Thumbnail {
        path: PathBuf,
        source: ThumbnailError,
    },

    #[error("{stage} for {path} exceeded {secs}s")]
    Timeout {
        path: PathBuf,
        stage: &'static str,
        secs: u64,
    },

    /// Same bytes as `original`, which failed earlier in the batch
    #[error("{path} duplicates {original}, which failed: {reason}")]
    DuplicateFailed {
        path: PathBuf,
        original: PathBuf,
        reason: String,
    },

    #[error("worker for {path} failed: {reason}")]
    Worker { path: PathBuf, reason: String },

    /// Catalog failures. Fatal when opening, per-file when inserting.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl IngestError {
    /// Whether this error must abort the whole run instead of a single file
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            Self::SourceMissing(_)
                | Self::ArchiveUnwritable { .. }
                | Self::ArchiveLocked(_)
                | Self::Config(_)
                | Self::Catalog(CatalogError::CreateDir { .. } | CatalogError::Poisoned)
        )
    }
}

pub type IngestResult<T> = Result<T, IngestError>;
