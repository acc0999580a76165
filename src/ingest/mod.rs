//! Ingest orchestration
//!
//! Walks a source tree and carries every supported file through
//! hash -> idempotency gate -> date -> copy -> thumbnails -> catalog.
//!
//! Files move in batches of `workers`. Hashing and rendering run on the
//! blocking pool in parallel; the gate and the commit run one file at a time
//! in discovery order, so catalog writes are serialized and destination names
//! are deterministic. A failure anywhere is recorded against that file and the
//! run continues.

pub mod date;
pub mod hasher;
pub mod lock;
pub mod paths;
pub mod report;

use chrono::Datelike;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::{spawn_blocking, JoinError, JoinHandle};
use walkdir::WalkDir;

use crate::config::{IngestConfig, ThumbnailConfig};
use crate::error::{CatalogError, IngestError, IngestResult};
use crate::raw::thumbnail::{self, RenderedThumbnail, ThumbPaths};
use crate::raw;
use crate::state::{Catalog, CatalogEntry, CatalogHandle, CatalogRegistry};
use date::CaptureDate;
use lock::ArchiveLock;

pub use report::{FailureNote, FileOutcome, IngestReport, RepairReport};

/// Cooperative stop request. Checked before each commit, so the file being
/// committed always finishes.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// File read and hashed, waiting on the idempotency gate
struct Hashed {
    path: PathBuf,
    bytes: Vec<u8>,
    hash: String,
}

/// Everything needed to commit a file, computed without touching the archive
struct Prepared {
    hashed: Hashed,
    capture: CaptureDate,
    thumbnail: RenderedThumbnail,
}

/// Owns one archive root for the duration of an ingest
pub struct Ingestor {
    archive_root: PathBuf,
    catalog: CatalogHandle,
    config: IngestConfig,
    cancel: CancelFlag,
    lock: ArchiveLock,
}

impl Ingestor {
    /// Claim `archive_root` and bind it to `catalog`.
    ///
    /// Fails fast when the root is unwritable, already locked by another
    /// ingest, or the config is invalid.
    pub fn new(
        archive_root: &Path,
        catalog: CatalogHandle,
        config: IngestConfig,
    ) -> IngestResult<Self> {
        config.validate()?;
        fs::create_dir_all(archive_root).map_err(|source| IngestError::ArchiveUnwritable {
            path: archive_root.to_path_buf(),
            source,
        })?;
        let lock = ArchiveLock::acquire(archive_root)?;

        Ok(Self {
            archive_root: archive_root.to_path_buf(),
            catalog,
            config,
            cancel: CancelFlag::new(),
            lock,
        })
    }

    /// Open the catalog through `registry` and claim the root in one step
    pub fn open(
        registry: &mut CatalogRegistry,
        archive_root: &Path,
        config: IngestConfig,
    ) -> IngestResult<Self> {
        let catalog = registry.open(archive_root)?;
        Self::new(archive_root, catalog, config)
    }

    pub fn archive_root(&self) -> &Path {
        &self.archive_root
    }

    pub fn catalog(&self) -> &CatalogHandle {
        &self.catalog
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Handle that stops the run before its next file
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Process every supported file under `source_root` once.
    ///
    /// Only run-fatal errors are returned; per-file failures are in the report.
    pub async fn run(&self, source_root: &Path) -> IngestResult<IngestReport> {
        let files = discover(source_root, &self.archive_root, &self.config)?;
        tracing::info!(
            source = %source_root.display(),
            count = files.len(),
            "Found potential image files"
        );

        let mut report = IngestReport {
            discovered: files.len(),
            ..IngestReport::default()
        };
        let mut seen = HashSet::new();

        for batch in files.chunks(self.config.worker_count()) {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            self.run_batch(batch, &mut seen, &mut report).await?;
            if report.cancelled {
                break;
            }
        }

        tracing::info!(
            cataloged = report.cataloged,
            skipped = report.skipped,
            failed = report.failed,
            cancelled = report.cancelled,
            "Finished processing files"
        );
        Ok(report)
    }

    async fn run_batch(
        &self,
        batch: &[PathBuf],
        seen: &mut HashSet<String>,
        report: &mut IngestReport,
    ) -> IngestResult<()> {
        // Discovered -> Hashed, in parallel
        let hashing: Vec<_> = batch
            .iter()
            .map(|path| {
                let owned = path.clone();
                (path, spawn_blocking(move || read_and_hash(owned)))
            })
            .collect();

        let mut pending = Vec::new();
        // Hash -> first path in this batch; later copies wait on its verdict
        let mut leaders: HashMap<String, PathBuf> = HashMap::new();
        let mut followers: Vec<(PathBuf, String)> = Vec::new();
        for (path, handle) in hashing {
            let hashed = match self.bounded(path, "read", handle).await {
                Ok(hashed) => hashed,
                Err(e) => {
                    report.record(path.clone(), &FileOutcome::Failed(e));
                    continue;
                }
            };
            if leaders.contains_key(&hashed.hash) {
                followers.push((path.clone(), hashed.hash));
                continue;
            }
            match self.already_cataloged(&hashed.hash, seen) {
                Ok(true) => report.record(
                    path.clone(),
                    &FileOutcome::AlreadyCataloged { hash: hashed.hash },
                ),
                Ok(false) => {
                    seen.insert(hashed.hash.clone());
                    leaders.insert(hashed.hash.clone(), path.clone());
                    pending.push(hashed);
                }
                Err(e) if e.is_run_fatal() => return Err(e),
                Err(e) => report.record(path.clone(), &FileOutcome::Failed(e)),
            }
        }

        // Leader verdicts: Ok for cataloged, Err(message) for failed
        let mut verdicts: HashMap<String, Result<(), String>> = HashMap::new();

        // Hashed -> DateResolved + thumbnail rendered, in parallel
        let preparing: Vec<_> = pending
            .into_iter()
            .map(|hashed| {
                let path = hashed.path.clone();
                let hash = hashed.hash.clone();
                let config = self.config.thumbnail.clone();
                (path, hash, spawn_blocking(move || prepare(hashed, &config)))
            })
            .collect();

        let mut ready = Vec::new();
        for (path, hash, handle) in preparing {
            match self.bounded(&path, "metadata and decode", handle).await {
                Ok(prepared) => ready.push(prepared),
                Err(e) => {
                    seen.remove(&hash);
                    verdicts.insert(hash, Err(e.to_string()));
                    report.record(path, &FileOutcome::Failed(e));
                }
            }
        }

        // Copied -> Thumbnailed -> Cataloged, one at a time
        for prepared in ready {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let path = prepared.hashed.path.clone();
            let hash = prepared.hashed.hash.clone();
            let root = self.archive_root.clone();
            let catalog = Arc::clone(&self.catalog);
            let handle = spawn_blocking(move || commit(&root, &catalog, prepared));

            match joined(&path, handle.await) {
                Ok(entry) => {
                    verdicts.insert(hash, Ok(()));
                    report.record(path, &FileOutcome::Cataloged(entry));
                }
                Err(e) if e.is_run_fatal() => return Err(e),
                Err(e) => {
                    seen.remove(&hash);
                    verdicts.insert(hash, Err(e.to_string()));
                    report.record(path, &FileOutcome::Failed(e));
                }
            }
        }

        // Copies share their leader's outcome. A leader cut off by
        // cancellation leaves its copies unprocessed.
        for (path, hash) in followers {
            let outcome = match verdicts.get(&hash) {
                Some(Ok(())) => FileOutcome::AlreadyCataloged { hash },
                Some(Err(reason)) => FileOutcome::Failed(IngestError::DuplicateFailed {
                    path: path.clone(),
                    original: leaders.get(&hash).cloned().unwrap_or_default(),
                    reason: reason.clone(),
                }),
                None => continue,
            };
            report.record(path, &outcome);
        }

        Ok(())
    }

    /// Idempotency gate: in the catalog, or already taken earlier in this run
    fn already_cataloged(&self, hash: &str, seen: &HashSet<String>) -> IngestResult<bool> {
        if seen.contains(hash) {
            return Ok(true);
        }
        let catalog = self.catalog.lock().map_err(|_| CatalogError::Poisoned)?;
        Ok(catalog.contains(hash)?)
    }

    /// Await a blocking stage, giving up after `stage_timeout_secs`
    async fn bounded<T>(
        &self,
        path: &Path,
        stage: &'static str,
        handle: JoinHandle<IngestResult<T>>,
    ) -> IngestResult<T> {
        let secs = self.config.stage_timeout_secs;
        match tokio::time::timeout(Duration::from_secs(secs), handle).await {
            Ok(result) => joined(path, result),
            Err(_) => Err(IngestError::Timeout {
                path: path.to_path_buf(),
                stage,
                secs,
            }),
        }
    }

    /// Re-derive thumbnails for entries with null dimensions or missing
    /// thumbnail files, and record the dimensions.
    pub async fn repair_thumbnails(&self) -> IngestResult<RepairReport> {
        let targets: Vec<CatalogEntry> = {
            let catalog = self.catalog.lock().map_err(|_| CatalogError::Poisoned)?;
            let mut targets = catalog.missing_thumbnails()?;
            // Recorded dimensions but the files were removed since
            targets.extend(catalog.entries()?.into_iter().filter(|entry| {
                entry.thumb.is_some()
                    && !ThumbPaths::for_dest(&self.archive_root, &entry.dest_path).both_exist()
            }));
            targets
        };

        let mut report = RepairReport {
            checked: targets.len(),
            ..RepairReport::default()
        };
        tracing::info!(count = targets.len(), "Entries needing thumbnails");

        for entry in targets {
            if self.cancel.is_cancelled() {
                break;
            }

            let original = self.archive_root.join(&entry.dest_path);
            let root = self.archive_root.clone();
            let dest_path = entry.dest_path.clone();
            let config = self.config.thumbnail.clone();
            let handle = spawn_blocking(move || rederive(&root, &dest_path, &config));

            let dims = match self.bounded(&original, "thumbnail repair", handle).await {
                Ok(dims) => dims,
                Err(e) => {
                    report.fail(original, &e);
                    continue;
                }
            };

            let updated = self
                .catalog
                .lock()
                .map_err(|_| CatalogError::Poisoned)?
                .update_thumbnail_dims(&entry.dest_path, dims);
            match updated {
                Ok(_) => {
                    report.repaired += 1;
                    tracing::info!(dest = %entry.dest_path, width = dims.width, height = dims.height, "Thumbnail repaired");
                }
                Err(e) => report.fail(original, &IngestError::from(e)),
            }
        }

        Ok(report)
    }

    /// Release the archive lock
    pub fn close(self) {
        tracing::debug!(path = %self.lock.path().display(), "Releasing archive lock");
    }
}

/// Supported files under `source_root` in sorted walk order, skipping the
/// archive itself when it lives inside the source tree.
pub fn discover(
    source_root: &Path,
    archive_root: &Path,
    config: &IngestConfig,
) -> IngestResult<Vec<PathBuf>> {
    let source = fs::canonicalize(source_root)
        .map_err(|_| IngestError::SourceMissing(source_root.to_path_buf()))?;
    let archive = fs::canonicalize(archive_root).ok();

    let walker = WalkDir::new(&source)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| archive.as_deref() != Some(e.path()));

    let mut files = Vec::new();
    for entry in walker {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_file() && config.is_supported(entry.path()) {
                    files.push(entry.into_path());
                }
            }
            Err(e) => {
                // Keep walking, an unreadable directory is not fatal
                tracing::warn!("Error accessing entry: {}", e);
            }
        }
    }
    Ok(files)
}

fn joined<T>(path: &Path, result: Result<IngestResult<T>, JoinError>) -> IngestResult<T> {
    result.map_err(|e| IngestError::Worker {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?
}

fn read_and_hash(path: PathBuf) -> IngestResult<Hashed> {
    let bytes = fs::read(&path).map_err(|source| IngestError::Read {
        path: path.clone(),
        source,
    })?;
    let hash = hasher::content_hash(&bytes);
    tracing::debug!(path = %path.display(), hash = %hash, "Hashed");
    Ok(Hashed { path, bytes, hash })
}

fn prepare(hashed: Hashed, config: &ThumbnailConfig) -> IngestResult<Prepared> {
    // Unreadable EXIF only means "no metadata"
    let exif = raw::read_exif(&hashed.bytes).ok();
    let capture = date::resolve_capture_date(&hashed.path, exif.as_ref())?;
    let orientation = exif
        .as_ref()
        .map(thumbnail::exif_orientation)
        .unwrap_or(thumbnail::UPRIGHT);

    let thumbnail = thumbnail::render(
        &hashed.bytes,
        raw::is_raw(&hashed.path),
        orientation,
        config,
    )
    .map_err(|source| IngestError::Thumbnail {
        path: hashed.path.clone(),
        source,
    })?;

    Ok(Prepared {
        hashed,
        capture,
        thumbnail,
    })
}

/// Copy, write thumbnails, insert. Anything written for this file is removed
/// again if a later step fails.
fn commit(
    archive_root: &Path,
    catalog: &Mutex<Catalog>,
    prepared: Prepared,
) -> IngestResult<CatalogEntry> {
    let Prepared {
        hashed: Hashed { path, bytes, hash },
        capture,
        thumbnail: rendered,
    } = prepared;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| IngestError::Read {
            path: path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
        })?;
    let (year, month) = (capture.instant.year(), capture.instant.month());

    let mut reservation =
        paths::reserve(archive_root, &file_name, year, month).map_err(|source| {
            IngestError::Write {
                path: archive_root.join(paths::month_dir(year, month)),
                source,
            }
        })?;
    reservation
        .write_all(&bytes)
        .and_then(|()| reservation.sync())
        .map_err(|source| IngestError::Write {
            path: reservation.abs_path.clone(),
            source,
        })?;

    let written = thumbnail::write(archive_root, &reservation.rel_path, &rendered).map_err(
        |source| IngestError::Thumbnail {
            path: path.clone(),
            source,
        },
    )?;

    let entry = CatalogEntry::new(
        hash,
        path.to_string_lossy().into_owned(),
        capture.instant,
        reservation.rel_path.clone(),
        Some(written.dims),
    );
    let inserted = match catalog.lock() {
        Ok(catalog) => catalog.insert(&entry),
        Err(_) => Err(CatalogError::Poisoned),
    };
    if let Err(e) = inserted {
        if written.created {
            written.paths.remove();
        }
        return Err(e.into());
    }

    reservation.keep();
    Ok(entry)
}

fn rederive(
    archive_root: &Path,
    dest_path: &str,
    config: &ThumbnailConfig,
) -> IngestResult<crate::state::ThumbDims> {
    let original = archive_root.join(dest_path);
    let bytes = fs::read(&original).map_err(|source| IngestError::Read {
        path: original.clone(),
        source,
    })?;
    let written = thumbnail::derive(archive_root, dest_path, &bytes, config).map_err(|source| {
        IngestError::Thumbnail {
            path: original,
            source,
        }
    })?;
    Ok(written.dims)
}
