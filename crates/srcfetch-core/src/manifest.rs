//! Package and patch manifests.
//!
//! A manifest is a TOML document whose top-level tables map a logical name to
//! `{ url, md5 }`:
//!
//! ```toml
//! [bash]
//! url = "https://ftp.gnu.org/gnu/bash/bash-5.2.21.tar.gz"
//! md5 = "ad5b38410e3bf0e9bcc20e2765f5e3f9"
//! ```
//!
//! Entries keep the order they have in the file.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Which of the two manifests a list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    Packages,
    Patches,
}

impl ManifestKind {
    /// Fixed file name, resolved relative to the working directory.
    pub fn file_name(self) -> &'static str {
        match self {
            ManifestKind::Packages => "system_package_list.toml",
            ManifestKind::Patches => "package_patch_list.toml",
        }
    }

    /// Header printed before the manifest is processed.
    pub fn header(self) -> &'static str {
        match self {
            ManifestKind::Packages => "====Download system package====",
            ManifestKind::Patches => "====Download system package patch====",
        }
    }
}

/// One item to fetch. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageEntry {
    pub name: String,
    pub url: String,
    pub expected_digest: String,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    url: Option<String>,
    md5: Option<String>,
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{name}: invalid entry: {reason}")]
    InvalidEntry { name: String, reason: String },
}

/// A loaded manifest, in file order.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub kind: ManifestKind,
    pub entries: Vec<PackageEntry>,
}

impl Manifest {
    /// Load `kind`'s fixed file name from `dir`.
    pub fn load_from_dir(dir: &Path, kind: ManifestKind) -> Result<Self, ManifestError> {
        Self::load(&dir.join(kind.file_name()), kind)
    }

    pub fn load(path: &Path, kind: ManifestKind) -> Result<Self, ManifestError> {
        let data = fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest = Self::parse(&data, path, kind)?;
        tracing::debug!(path = %path.display(), count = manifest.len(), "loaded manifest");
        Ok(manifest)
    }

    /// Parse manifest text directly (no file).
    pub fn from_toml_str(data: &str, kind: ManifestKind) -> Result<Self, ManifestError> {
        Self::parse(data, Path::new("<inline>"), kind)
    }

    /// `path` only labels parse errors.
    fn parse(data: &str, path: &Path, kind: ManifestKind) -> Result<Self, ManifestError> {
        let entries = parse_entries(data).map_err(|e| match e {
            ParseFailure::Toml(source) => ManifestError::Parse {
                path: path.to_path_buf(),
                source,
            },
            ParseFailure::Entry(e) => e,
        })?;
        Ok(Manifest { kind, entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

enum ParseFailure {
    Toml(toml::de::Error),
    Entry(ManifestError),
}

fn parse_entries(data: &str) -> Result<Vec<PackageEntry>, ParseFailure> {
    let table: toml::Table = toml::from_str(data).map_err(ParseFailure::Toml)?;
    table
        .into_iter()
        .map(|(name, value)| entry_from_value(name, value).map_err(ParseFailure::Entry))
        .collect()
}

fn entry_from_value(name: String, value: toml::Value) -> Result<PackageEntry, ManifestError> {
    let invalid = |name: &str, reason: &str| ManifestError::InvalidEntry {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.trim().is_empty() {
        return Err(invalid(&name, "empty name"));
    }
    if !value.is_table() {
        return Err(invalid(&name, "expected a table with `url` and `md5`"));
    }
    let raw: RawEntry = value
        .try_into()
        .map_err(|e: toml::de::Error| invalid(&name, e.message()))?;
    let url = raw
        .url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| invalid(&name, "missing `url`"))?;
    let expected_digest = raw
        .md5
        .filter(|d| !d.is_empty())
        .ok_or_else(|| invalid(&name, "missing `md5`"))?;
    Ok(PackageEntry {
        name,
        url,
        expected_digest,
    })
}
