//! Catalog state
//!
//! This module handles everything that persists between runs:
//! - The SQLite catalog and its per-root registry (catalog.rs)
//! - Shared data structures (data.rs)

pub mod catalog;
pub mod data;

pub use catalog::{Catalog, CatalogHandle, CatalogRegistry};
pub use data::{CatalogEntry, ThumbDims};
