//! Photo archive ingestion
//!
//! Walks a source tree, identifies each photo by the SHA-256 of its bytes,
//! copies new ones into a `{year}/{month}` archive layout, derives WebP and
//! JPEG thumbnails, and records everything in a per-archive SQLite catalog.
//! Re-running over the same source is a no-op.

pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod raw;
pub mod state;

pub use config::{IngestConfig, ThumbnailConfig};
pub use error::{CatalogError, ConfigError, IngestError, IngestResult, ThumbnailError};
pub use ingest::{CancelFlag, FailureNote, IngestReport, Ingestor, RepairReport};
pub use state::{Catalog, CatalogEntry, CatalogHandle, CatalogRegistry, ThumbDims};
