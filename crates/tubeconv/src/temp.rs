//! Temporary file allocation and guaranteed release.
//!
//! `allocate` is stateless: uniqueness comes from a microsecond timestamp
//! plus random bytes, so no registry is needed. Tracking what a job
//! allocated is the job's business, through a `TempSet`.

use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use walkdir::WalkDir;

/// File name prefix of every temp file this crate creates
pub const TEMP_PREFIX: &str = "tubeconv-";

/// Return a fresh path inside `dir` ending in `ext` (leading dot optional)
pub fn allocate(dir: &Path, ext: &str) -> PathBuf {
    let stamp = chrono::Utc::now().timestamp_micros();
    let suffix = hex::encode(rand::random::<[u8; 6]>());
    let ext = ext.trim_start_matches('.');
    let name = if ext.is_empty() {
        format!("{}{}-{}", TEMP_PREFIX, stamp, suffix)
    } else {
        format!("{}{}-{}.{}", TEMP_PREFIX, stamp, suffix, ext)
    };
    dir.join(name)
}

/// Remove `path` if it exists. Never fails.
pub async fn release(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Released temp file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!("Failed to release temp file {}: {}", path.display(), e),
    }
}

/// Name shared by an allocated path and every file derived from it
fn allocation_stem(path: &Path) -> Option<&str> {
    path.file_name()?.to_str()?.split('.').next()
}

/// Remove the allocated paths and every sibling sharing their stem
///
/// Covers the intermediates extractors write next to their output
/// (`<stem>.f137.mp4.part`, `<stem>.temp.mp4`, `<stem>.mp3.ytdl`).
fn remove_allocated(dir: &Path, paths: &[PathBuf]) -> usize {
    let stems: Vec<&str> = paths.iter().filter_map(|p| allocation_stem(p)).collect();
    if stems.is_empty() {
        return 0;
    }

    let mut removed = 0;
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let belongs = entry
            .file_name()
            .to_str()
            .and_then(|n| n.split('.').next())
            .map(|stem| stems.iter().any(|s| *s == stem))
            .unwrap_or(false);
        if !belongs {
            continue;
        }

        let result = if entry.file_type().is_dir() {
            std::fs::remove_dir_all(entry.path())
        } else {
            std::fs::remove_file(entry.path())
        };
        match result {
            Ok(()) => {
                debug!("Released temp file {}", entry.path().display());
                removed += 1;
            }
            Err(e) => debug!("Failed to release temp file {}: {}", entry.path().display(), e),
        }
    }
    removed
}

/// Paths allocated by a single job
///
/// `release_all` is called when the job's frame exits. If the set is dropped
/// without it (panic, cancelled task) the remaining files are removed
/// synchronously in `Drop`.
#[derive(Debug)]
pub struct TempSet {
    dir: PathBuf,
    paths: Vec<PathBuf>,
}

impl TempSet {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        TempSet {
            dir: dir.into(),
            paths: Vec::new(),
        }
    }

    /// Allocate a new path and record it for release
    pub fn allocate(&mut self, ext: &str) -> PathBuf {
        let path = allocate(&self.dir, ext);
        self.paths.push(path.clone());
        path
    }

    /// Paths allocated so far, in allocation order
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Remove every allocated path and any intermediates derived from it
    pub async fn release_all(&mut self) {
        if self.paths.is_empty() {
            return;
        }
        let dir = self.dir.clone();
        let paths = self.paths.clone();
        // Paths are cleared only afterwards so a cancelled release leaves the rest to Drop
        match tokio::task::spawn_blocking(move || remove_allocated(&dir, &paths)).await {
            Ok(removed) => debug!("Released {} temp file(s)", removed),
            Err(e) => warn!("Temp release task failed: {}", e),
        }
        self.paths.clear();
    }
}

impl Drop for TempSet {
    fn drop(&mut self) {
        if !self.paths.is_empty() {
            remove_allocated(&self.dir, &self.paths);
            self.paths.clear();
        }
    }
}

/// Remove temp files left behind by a previous run
///
/// Only call this before any job is admitted: every prefixed file in `dir`
/// is considered orphaned.
pub async fn sweep_orphans(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let orphans = tokio::task::spawn_blocking({
        let dir = dir.to_path_buf();
        move || {
            WalkDir::new(&dir)
                .min_depth(1)
                .max_depth(1)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter(|e| {
                    e.file_name()
                        .to_str()
                        .map(|n| n.starts_with(TEMP_PREFIX))
                        .unwrap_or(false)
                })
                .map(|e| e.into_path())
                .collect::<Vec<_>>()
        }
    })
    .await
    .context("Failed to scan for orphaned temp files")?;

    let mut cleaned = 0;
    for path in orphans {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("🗑️  Removed orphaned temp file: {}", path.display());
                cleaned += 1;
            }
            Err(e) => warn!("Failed to remove orphaned temp file {}: {}", path.display(), e),
        }
    }

    Ok(cleaned)
}
