use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::{IngestError, IngestResult};
use crate::state::catalog::META_DIR;

const LOCK_FILE: &str = "ingest.lock";

/// Exclusive claim on an archive root for the lifetime of one ingest.
/// Released when dropped.
#[derive(Debug)]
pub struct ArchiveLock {
    file: File,
    path: PathBuf,
}

impl ArchiveLock {
    /// Take the lock without waiting. A second holder gets
    /// [`IngestError::ArchiveLocked`].
    pub fn acquire(archive_root: &Path) -> IngestResult<Self> {
        let meta_dir = archive_root.join(META_DIR);
        fs::create_dir_all(&meta_dir).map_err(|source| IngestError::ArchiveUnwritable {
            path: archive_root.to_path_buf(),
            source,
        })?;

        let path = meta_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| IngestError::ArchiveUnwritable {
                path: archive_root.to_path_buf(),
                source,
            })?;

        if file.try_lock_exclusive().is_err() {
            return Err(IngestError::ArchiveLocked(archive_root.to_path_buf()));
        }
        tracing::debug!(path = %path.display(), "Archive lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ArchiveLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release archive lock");
        }
    }
}
