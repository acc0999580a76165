use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::state::catalog::META_DIR;

/// Source extensions picked up by discovery (compared case-insensitively)
pub const DEFAULT_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "heic", "cr2", "nef"];

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Bounding box edge in pixels
    pub max_edge: u32,
    pub webp_quality: f32,
    pub jpeg_quality: u8,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            max_edge: 200,
            webp_quality: 80.0,
            jpeg_quality: 80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub extensions: Vec<String>,
    /// Parallel workers for hashing and rendering; 0 means one per CPU core
    pub workers: usize,
    /// Upper bound on metadata read + decode for a single file
    pub stage_timeout_secs: u64,
    pub thumbnail: ThumbnailConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            workers: 0,
            stage_timeout_secs: 120,
            thumbnail: ThumbnailConfig::default(),
        }
    }
}

impl IngestConfig {
    /// Defaults, then the TOML file, then environment overrides.
    ///
    /// The file is `explicit` if given, else `$PHOTO_ARCHIVE_CONFIG`, else
    /// `<archive_root>/.meta/config.toml` when present.
    pub fn load(explicit: Option<&Path>, archive_root: &Path) -> Result<Self, ConfigError> {
        let mut cfg = match resolve_config_path(explicit, archive_root) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env_overrides(&mut self) {
        self.workers = env_or_usize("PHOTO_ARCHIVE_WORKERS", self.workers);
        self.stage_timeout_secs =
            env_or_u64("PHOTO_ARCHIVE_STAGE_TIMEOUT_SECS", self.stage_timeout_secs);
        self.extensions = env_or_csv("PHOTO_ARCHIVE_EXTENSIONS", &self.extensions);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.extensions.iter().all(|e| e.trim().is_empty()) {
            return Err(ConfigError::Invalid("extension list cannot be empty".into()));
        }
        if self.stage_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "stage timeout must be >= 1 second".into(),
            ));
        }
        if self.thumbnail.max_edge == 0 {
            return Err(ConfigError::Invalid("thumbnail max edge must be >= 1".into()));
        }
        if !(0.0..=100.0).contains(&self.thumbnail.webp_quality) {
            return Err(ConfigError::Invalid(
                "webp quality must be within 0..=100".into(),
            ));
        }
        if !(1..=100).contains(&self.thumbnail.jpeg_quality) {
            return Err(ConfigError::Invalid(
                "jpeg quality must be within 1..=100".into(),
            ));
        }
        Ok(())
    }

    /// Effective pool size
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Whether `path` carries an allow-listed extension
    pub fn is_supported(&self, path: &Path) -> bool {
        let Some(ext) = path.extension() else {
            return false;
        };
        let ext = ext.to_string_lossy();
        self.extensions
            .iter()
            .map(|allowed| allowed.trim().trim_start_matches('.'))
            .any(|allowed| allowed.eq_ignore_ascii_case(&ext))
    }
}

fn resolve_config_path(explicit: Option<&Path>, archive_root: &Path) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Ok(custom) = env::var("PHOTO_ARCHIVE_CONFIG") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let in_archive = archive_root.join(META_DIR).join(CONFIG_FILE);
    if in_archive.exists() {
        return Some(in_archive);
    }

    let user = dirs::config_dir()?.join("photo-archive").join(CONFIG_FILE);
    user.exists().then_some(user)
}

fn env_or_usize(var: &str, fallback: usize) -> usize {
    match env::var(var) {
        Ok(v) => v.trim().parse::<usize>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_csv(var: &str, fallback: &[String]) -> Vec<String> {
    match env::var(var) {
        Ok(v) => {
            let out = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned)
                .collect::<Vec<_>>();
            if out.is_empty() {
                fallback.to_vec()
            } else {
                out
            }
        }
        Err(_) => fallback.to_vec(),
    }
}
