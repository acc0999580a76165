use chrono::DateTime;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::data::{CatalogEntry, ThumbDims};
use crate::error::CatalogError;

/// Directory under the archive root that holds the catalog store
pub const META_DIR: &str = ".meta";
/// SQLite file name inside [`META_DIR`]
pub const CATALOG_FILE: &str = "gallery.db";

/// Column names are part of the on-disk contract read by the site builder
const ENTRY_COLUMNS: &str = "contentHash, sourcePath, captureDate, year, month, destPath, thumbWidth, thumbHeight";

/// The Catalog manages the SQLite store for one archive root.
/// It is the single source of truth for "already processed".
pub struct Catalog {
    conn: Connection,
    db_path: PathBuf,
}

impl Catalog {
    /// Open (or create) the catalog under `<archive_root>/.meta/`.
    pub fn open(archive_root: &Path) -> Result<Self, CatalogError> {
        let meta_dir = archive_root.join(META_DIR);
        std::fs::create_dir_all(&meta_dir).map_err(|source| CatalogError::CreateDir {
            path: meta_dir.clone(),
            source,
        })?;

        let db_path = meta_dir.join(CATALOG_FILE);
        let conn = Connection::open(&db_path)?;
        tracing::debug!(path = %db_path.display(), "Catalog opened");

        let catalog = Catalog { conn, db_path };
        catalog.init_schema()?;
        Ok(catalog)
    }

    /// Create the schema if it doesn't exist. Safe to run on every open.
    fn init_schema(&self) -> Result<(), CatalogError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS images (
                contentHash     TEXT PRIMARY KEY,
                sourcePath      TEXT NOT NULL,
                captureDate     TEXT NOT NULL,
                year            INTEGER NOT NULL,
                month           INTEGER NOT NULL,
                destPath        TEXT NOT NULL UNIQUE,
                thumbWidth      INTEGER,
                thumbHeight     INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_images_year_month
                ON images(year, month);",
        )?;
        Ok(())
    }

    /// Get the path to the database file
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Idempotency gate: is this content already archived?
    pub fn contains(&self, content_hash: &str) -> Result<bool, CatalogError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM images WHERE contentHash = ?1",
                [content_hash],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert a complete entry. Fails with [`CatalogError::Duplicate`] if the
    /// hash or the destination path is already present.
    pub fn insert(&self, entry: &CatalogEntry) -> Result<(), CatalogError> {
        let result = self.conn.execute(
            &format!(
                "INSERT INTO images ({ENTRY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ),
            params![
                entry.content_hash,
                entry.source_path,
                entry.capture_date.to_rfc3339(),
                entry.year,
                entry.month,
                entry.dest_path,
                entry.thumb.map(|t| t.width),
                entry.thumb.map(|t| t.height),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(CatalogError::Duplicate {
                    hash: entry.content_hash.clone(),
                    dest_path: entry.dest_path.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fill thumbnail dimensions for the entry at `dest_path`.
    /// Returns false if no entry has that destination.
    pub fn update_thumbnail_dims(
        &self,
        dest_path: &str,
        dims: ThumbDims,
    ) -> Result<bool, CatalogError> {
        let changed = self.conn.execute(
            "UPDATE images SET thumbWidth = ?1, thumbHeight = ?2 WHERE destPath = ?3",
            params![dims.width, dims.height, dest_path],
        )?;
        Ok(changed > 0)
    }

    /// Look up a single entry by content hash
    pub fn get(&self, content_hash: &str) -> Result<Option<CatalogEntry>, CatalogError> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM images WHERE contentHash = ?1"),
                [content_hash],
                RawEntry::from_row,
            )
            .optional()?;
        row.map(RawEntry::into_entry).transpose()
    }

    /// All entries, newest capture first
    pub fn entries(&self) -> Result<Vec<CatalogEntry>, CatalogError> {
        self.query_entries(&format!(
            "SELECT {ENTRY_COLUMNS} FROM images ORDER BY captureDate DESC, destPath"
        ))
    }

    /// Entries whose thumbnail dimensions were never recorded
    pub fn missing_thumbnails(&self) -> Result<Vec<CatalogEntry>, CatalogError> {
        self.query_entries(&format!(
            "SELECT {ENTRY_COLUMNS} FROM images
             WHERE thumbWidth IS NULL OR thumbHeight IS NULL
             ORDER BY destPath"
        ))
    }

    /// Get a count of entries in the catalog
    pub fn count(&self) -> Result<i64, CatalogError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
        Ok(count)
    }

    fn query_entries(&self, sql: &str) -> Result<Vec<CatalogEntry>, CatalogError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], RawEntry::from_row)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.into_entry()?);
        }
        Ok(entries)
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("db_path", &self.db_path)
            .finish()
    }
}

/// Row as stored, before the capture date is parsed back
struct RawEntry {
    content_hash: String,
    source_path: String,
    capture_date: String,
    dest_path: String,
    thumb_width: Option<u32>,
    thumb_height: Option<u32>,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        // year/month (3, 4) are derived from captureDate on the way out
        Ok(RawEntry {
            content_hash: row.get(0)?,
            source_path: row.get(1)?,
            capture_date: row.get(2)?,
            dest_path: row.get(5)?,
            thumb_width: row.get(6)?,
            thumb_height: row.get(7)?,
        })
    }

    fn into_entry(self) -> Result<CatalogEntry, CatalogError> {
        let capture_date = DateTime::parse_from_rfc3339(&self.capture_date).map_err(|e| {
            CatalogError::InvalidDate {
                value: self.capture_date.clone(),
                reason: e.to_string(),
            }
        })?;
        let thumb = match (self.thumb_width, self.thumb_height) {
            (Some(width), Some(height)) => Some(ThumbDims { width, height }),
            _ => None,
        };
        Ok(CatalogEntry::new(
            self.content_hash,
            self.source_path,
            capture_date,
            self.dest_path,
            thumb,
        ))
    }
}

/// Shared handle to one archive root's catalog
pub type CatalogHandle = Arc<Mutex<Catalog>>;

/// Open catalogs keyed by archive root, so repeated lookups for the same
/// root reuse one handle instead of reopening storage.
#[derive(Default)]
pub struct CatalogRegistry {
    handles: HashMap<PathBuf, CatalogHandle>,
}

impl CatalogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the handle for `archive_root`, opening it on first use
    pub fn open(&mut self, archive_root: &Path) -> Result<CatalogHandle, CatalogError> {
        if let Some(handle) = self.handles.get(&registry_key(archive_root)) {
            return Ok(Arc::clone(handle));
        }

        let catalog = Catalog::open(archive_root)?;
        // The root exists now, so the canonical key is stable from here on
        let key = registry_key(archive_root);
        let handle = Arc::new(Mutex::new(catalog));
        self.handles.insert(key, Arc::clone(&handle));
        Ok(handle)
    }

    /// Drop the registry's handle for `archive_root`. The store closes once
    /// the last outstanding clone is dropped.
    pub fn close(&mut self, archive_root: &Path) -> bool {
        self.handles.remove(&registry_key(archive_root)).is_some()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

fn registry_key(archive_root: &Path) -> PathBuf {
    std::fs::canonicalize(archive_root).unwrap_or_else(|_| archive_root.to_path_buf())
}
