//! Scoped scratch space for in-progress downloads.
//!
//! A [`StagingArea`] is a private directory created inside the cache directory
//! so that publishing is a same-filesystem `rename`. It is removed when
//! dropped, together with anything still inside it, so a failed attempt never
//! leaves a partial file behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// Prefix of staging directory names inside the cache directory.
pub const STAGING_PREFIX: &str = ".srcfetch-staging-";

/// Per-attempt scratch directory. Removed on drop.
#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
}

impl StagingArea {
    /// Create a fresh staging directory under `cache_dir`.
    pub fn create_in(cache_dir: &Path) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(cache_dir)?;
        tracing::debug!(path = %dir.path().display(), "created staging area");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path the download for `filename` is written to.
    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.dir.path().join(filename)
    }

    /// Wraps an already written file in this area for sync and publish.
    pub fn staged(&self, filename: &str) -> StagedFile<'_> {
        StagedFile {
            path: self.file_path(filename),
            _area: self,
        }
    }
}

/// A fully written file inside a [`StagingArea`]. Borrowing the area keeps the
/// directory alive until the file is published.
#[derive(Debug)]
pub struct StagedFile<'a> {
    path: PathBuf,
    _area: &'a StagingArea,
}

impl StagedFile<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush file data to disk. Call before hashing and publish for durability.
    pub fn sync(&self) -> io::Result<()> {
        fs::File::open(&self.path)?.sync_all()
    }

    /// Atomically rename into `final_path`. Consumes the handle. Fails if
    /// `final_path` is on a different filesystem.
    pub fn publish(self, final_path: &Path) -> io::Result<()> {
        fs::rename(&self.path, final_path)
    }
}

/// Staging dirs untouched for this long belong to a dead run and may be swept.
/// Younger ones may still be in use by another process sharing the cache dir.
pub const STALE_STAGING_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// True if `name` looks like a staging directory left in a cache directory.
pub fn is_staging_name(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX)
}

/// True if `dir` was last modified more than [`STALE_STAGING_AGE`] before `now`.
/// A dir with an unreadable or future mtime is never stale.
pub fn is_stale(dir: &Path, now: SystemTime) -> bool {
    if let Ok(metadata) = fs::metadata(dir) {
        if let Ok(modified) = metadata.modified() {
            if let Ok(age) = now.duration_since(modified) {
                return age > STALE_STAGING_AGE;
            }
        }
    }
    false
}
