//! Download-and-verify into the cache directory.
//!
//! A file is visible in the cache under its final name only after its MD5
//! matched the manifest value. Everything before that happens in a
//! [`StagingArea`] that is removed on every exit path.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use thiserror::Error;

use crate::checksum;
use crate::manifest::PackageEntry;
use crate::staging::{self, StagingArea};
use crate::transport::{Transport, TransportError};
use crate::url_model;

/// Successful outcome of [`Fetcher::ensure_cached`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The cache already had a file with that name; nothing was fetched.
    Skipped,
    /// Downloaded, verified and published.
    Fetched { bytes: u64 },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{name}: cannot derive a file name from url {url}")]
    InvalidUrl { name: String, url: String },
    #[error("{name}: download of {url} failed: {source}")]
    TransportFailure {
        name: String,
        url: String,
        #[source]
        source: TransportError,
    },
    #[error("{name}: staging failed: {source}")]
    Staging {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("{name} md5 sum verification failed, expect {expected}, actual: {actual}")]
    DigestMismatch {
        name: String,
        expected: String,
        actual: String,
    },
    #[error("{name}: failed to move verified file to {path}: {source}")]
    Publish {
        name: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FetchError {
    /// Logical item name the error is about.
    pub fn name(&self) -> &str {
        match self {
            FetchError::InvalidUrl { name, .. }
            | FetchError::TransportFailure { name, .. }
            | FetchError::Staging { name, .. }
            | FetchError::DigestMismatch { name, .. }
            | FetchError::Publish { name, .. } => name,
        }
    }

    /// Content did not match the declared checksum. Always fatal to a batch.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, FetchError::DigestMismatch { .. })
    }
}

/// Per-filename locks so concurrent attempts on the same cache name are serialized.
#[derive(Debug, Default)]
struct FilenameLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FilenameLocks {
    fn lock_for(&self, filename: &str) -> Arc<Mutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(map.entry(filename.to_string()).or_default())
    }
}

/// Fetches manifest items into a cache directory through a [`Transport`].
pub struct Fetcher {
    cache_dir: PathBuf,
    transport: Arc<dyn Transport>,
    locks: FilenameLocks,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("cache_dir", &self.cache_dir)
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    /// Create the cache directory if needed and remove staging directories
    /// left behind by an interrupted run. Only dirs older than
    /// [`staging::STALE_STAGING_AGE`] are removed, so a concurrent process
    /// sharing the cache dir keeps its in-progress download.
    pub fn new(cache_dir: impl Into<PathBuf>, transport: Arc<dyn Transport>) -> io::Result<Self> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir)?;
        sweep_stale_staging(&cache_dir)?;
        Ok(Self {
            cache_dir,
            transport,
            locks: FilenameLocks::default(),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// [`Fetcher::ensure_cached`] for a manifest entry.
    pub fn ensure_entry(&self, entry: &PackageEntry) -> Result<FetchOutcome, FetchError> {
        self.ensure_cached(&entry.name, &entry.url, &entry.expected_digest)
    }

    /// Make sure the file behind `url` is in the cache.
    ///
    /// An existing file with the derived name is trusted as-is and returned as
    /// [`FetchOutcome::Skipped`] without touching the network. Otherwise the
    /// file is downloaded into a staging area, its MD5 is compared verbatim
    /// (case-sensitive) with `expected_digest`, and on match it is renamed
    /// into the cache.
    pub fn ensure_cached(
        &self,
        name: &str,
        url: &str,
        expected_digest: &str,
    ) -> Result<FetchOutcome, FetchError> {
        let filename = url_model::filename_from_url(url).ok_or_else(|| FetchError::InvalidUrl {
            name: name.to_string(),
            url: url.to_string(),
        })?;
        let target = self.cache_dir.join(&filename);

        let lock = self.locks.lock_for(&filename);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        if target.exists() {
            tracing::info!("{} already exists, skip download.", target.display());
            return Ok(FetchOutcome::Skipped);
        }

        let staging_err = |source: io::Error| FetchError::Staging {
            name: name.to_string(),
            source,
        };
        let area = StagingArea::create_in(&self.cache_dir).map_err(staging_err)?;

        let bytes = self
            .transport
            .download(url, &area.file_path(&filename))
            .map_err(|source| FetchError::TransportFailure {
                name: name.to_string(),
                url: url.to_string(),
                source,
            })?;

        let staged = area.staged(&filename);
        staged.sync().map_err(staging_err)?;
        let actual = checksum::md5_path(staged.path()).map_err(staging_err)?;
        tracing::debug!(name, expected = expected_digest, actual = %actual, "verified digest");
        if actual != expected_digest {
            return Err(FetchError::DigestMismatch {
                name: name.to_string(),
                expected: expected_digest.to_string(),
                actual,
            });
        }

        staged.publish(&target).map_err(|source| FetchError::Publish {
            name: name.to_string(),
            path: target.clone(),
            source,
        })?;
        tracing::info!(name, bytes, "cached {}", target.display());
        Ok(FetchOutcome::Fetched { bytes })
    }
}

fn sweep_stale_staging(cache_dir: &Path) -> io::Result<()> {
    let now = SystemTime::now();
    for entry in fs::read_dir(cache_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if staging::is_staging_name(&name.to_string_lossy())
            && entry.file_type()?.is_dir()
            && staging::is_stale(&entry.path(), now)
        {
            tracing::warn!(path = %entry.path().display(), "removing stale staging directory");
            fs::remove_dir_all(entry.path())?;
        }
    }
    Ok(())
}
