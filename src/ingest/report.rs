use serde::Serialize;
use std::path::PathBuf;

use crate::error::IngestError;
use crate::state::data::CatalogEntry;

/// Terminal state of one discovered file
#[derive(Debug)]
pub enum FileOutcome {
    Cataloged(CatalogEntry),
    AlreadyCataloged { hash: String },
    Failed(IngestError),
}

/// A per-file failure as shown to the user
#[derive(Debug, Clone, Serialize)]
pub struct FailureNote {
    pub path: PathBuf,
    pub message: String,
}

/// Summary of one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub discovered: usize,
    pub cataloged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<FailureNote>,
    /// True when the run stopped early on request
    pub cancelled: bool,
}

impl IngestReport {
    pub fn record(&mut self, path: PathBuf, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Cataloged(entry) => {
                self.cataloged += 1;
                tracing::info!(
                    path = %path.display(),
                    dest = %entry.dest_path,
                    "Cataloged"
                );
            }
            FileOutcome::AlreadyCataloged { hash } => {
                self.skipped += 1;
                tracing::info!(path = %path.display(), hash = %hash, "Skipping (already processed)");
            }
            FileOutcome::Failed(err) => {
                self.failed += 1;
                tracing::warn!(path = %path.display(), error = %err, "Failed to process");
                self.failures.push(FailureNote {
                    path,
                    message: err.to_string(),
                });
            }
        }
    }

    /// Files that reached a terminal state
    pub fn processed(&self) -> usize {
        self.cataloged + self.skipped + self.failed
    }
}

/// Summary of a thumbnail repair pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairReport {
    /// Entries with null dimensions or missing thumbnail files
    pub checked: usize,
    pub repaired: usize,
    pub failed: usize,
    pub failures: Vec<FailureNote>,
}

impl RepairReport {
    pub fn fail(&mut self, path: PathBuf, err: &IngestError) {
        self.failed += 1;
        tracing::warn!(path = %path.display(), error = %err, "Thumbnail repair failed");
        self.failures.push(FailureNote {
            path,
            message: err.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_failure_messages() {
        let mut report = IngestReport::default();
        report.record(
            PathBuf::from("/src/a.jpg"),
            &FileOutcome::AlreadyCataloged { hash: "aa".into() },
        );
        report.record(
            PathBuf::from("/src/broken.jpg"),
            &FileOutcome::Failed(IngestError::Read {
                path: PathBuf::from("/src/broken.jpg"),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            }),
        );

        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.processed(), 2);
        assert_eq!(report.failures[0].path, PathBuf::from("/src/broken.jpg"));
        assert!(report.failures[0].message.contains("/src/broken.jpg"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["failed"], 1);
    }
}
