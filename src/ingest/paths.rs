//! Destination allocation inside the archive
//!
//! Originals land at `{year}/{month:02}/{file name}`. When that name is taken,
//! `-1`, `-2`, ... is appended to the stem until a free name is found. A name
//! also counts as taken when its thumbnails already exist, so two originals
//! that differ only by extension never share a thumbnail.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::raw::thumbnail::ThumbPaths;
use crate::state::data::split_file_name;

/// `2023/05`
pub fn month_dir(year: i32, month: u32) -> String {
    format!("{year}/{month:02}")
}

/// Name for the `attempt`-th candidate: the original for 0, `stem-N.ext` after
pub fn candidate_name(file_name: &str, attempt: u32) -> String {
    if attempt == 0 {
        return file_name.to_string();
    }
    match split_file_name(file_name) {
        (stem, Some(ext)) => format!("{stem}-{attempt}.{ext}"),
        (stem, None) => format!("{stem}-{attempt}"),
    }
}

/// A destination claimed on disk by an exclusive create.
///
/// The file is deleted on drop unless [`Reservation::keep`] is called, so an
/// item that fails after allocation leaves nothing behind.
#[derive(Debug)]
pub struct Reservation {
    /// Archive-relative, `/`-separated
    pub rel_path: String,
    pub abs_path: PathBuf,
    file: Option<File>,
    kept: bool,
}

impl Reservation {
    /// Write the original bytes into the reserved file
    pub fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.write_all(bytes),
            None => Err(io::Error::new(
                io::ErrorKind::Other,
                "reservation already closed",
            )),
        }
    }

    /// Flush the written bytes to disk
    pub fn sync(&self) -> io::Result<()> {
        match self.file.as_ref() {
            Some(file) => file.sync_all(),
            None => Ok(()),
        }
    }

    /// Keep the file; it is no longer removed on drop
    pub fn keep(mut self) {
        self.file.take();
        self.kept = true;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.kept {
            return;
        }
        self.file.take();
        if let Err(e) = fs::remove_file(&self.abs_path) {
            tracing::warn!(path = %self.abs_path.display(), error = %e, "Failed to roll back reserved file");
        }
    }
}

/// Reserve the first free destination for `file_name` in `(year, month)`.
///
/// The check and the claim are a single `create_new` open, which is atomic
/// within one process. Concurrent ingests into the same root are excluded by
/// the archive lock.
pub fn reserve(
    archive_root: &Path,
    file_name: &str,
    year: i32,
    month: u32,
) -> io::Result<Reservation> {
    let dir = month_dir(year, month);
    fs::create_dir_all(archive_root.join(&dir))?;

    let mut attempt = 0u32;
    loop {
        let name = candidate_name(file_name, attempt);
        let rel_path = format!("{dir}/{name}");
        let abs_path = archive_root.join(&dir).join(&name);

        if !ThumbPaths::for_dest(archive_root, &rel_path).any_exists() {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&abs_path)
            {
                Ok(file) => {
                    return Ok(Reservation {
                        rel_path,
                        abs_path,
                        file: Some(file),
                        kept: false,
                    })
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e),
            }
        }

        attempt = attempt.checked_add(1).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::Other,
                format!("no free destination for {file_name} in {dir}"),
            )
        })?;
    }
}
