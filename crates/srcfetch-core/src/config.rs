use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::batch::{BatchOptions, TransportFailurePolicy};
use crate::manifest::ManifestKind;
use crate::transport::TransportSettings;

/// Environment variable selecting the cache root.
pub const CACHE_ROOT_ENV: &str = "LFS";
/// Cache root used when `$LFS` is unset or empty.
pub const DEFAULT_CACHE_ROOT: &str = "/mnt/lfs";
/// Subdirectory of the cache root holding fetched sources.
pub const SOURCES_SUBDIR: &str = "sources";

/// User settings loaded from `~/.config/srcfetch/config.toml`. Every key is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Abort a transfer slower than this many bytes/s for `low_speed_time_secs`.
    pub low_speed_limit: u32,
    pub low_speed_time_secs: u64,
    pub connect_timeout_secs: u64,
    /// Hard limit for one transfer.
    pub timeout_secs: u64,
    /// Items fetched at once; 1 processes the manifest in order.
    pub jobs: usize,
    /// Skip items whose download fails instead of stopping the run.
    /// Digest mismatches always stop the run.
    pub keep_going: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let transport = TransportSettings::default();
        Self {
            low_speed_limit: transport.low_speed_limit,
            low_speed_time_secs: transport.low_speed_time.as_secs(),
            connect_timeout_secs: transport.connect_timeout.as_secs(),
            timeout_secs: transport.timeout.as_secs(),
            jobs: 1,
            keep_going: false,
        }
    }
}

impl Settings {
    pub fn transport(&self) -> TransportSettings {
        TransportSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            low_speed_limit: self.low_speed_limit,
            low_speed_time: Duration::from_secs(self.low_speed_time_secs),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    pub fn batch(&self) -> BatchOptions {
        BatchOptions {
            jobs: self.jobs.max(1),
            transport_failures: if self.keep_going {
                TransportFailurePolicy::Continue
            } else {
                TransportFailurePolicy::Abort
            },
        }
    }
}

pub fn settings_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("srcfetch")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load settings from disk, creating a default file if none exists.
///
/// An unusable XDG config dir falls back to defaults with a warning; only a
/// settings file that exists but cannot be read or parsed is an error.
pub fn load_or_init() -> Result<Settings> {
    match settings_path() {
        Ok(path) => load_or_init_at(&path),
        Err(e) => {
            tracing::warn!("config dir unusable ({:#}), using default settings", e);
            Ok(Settings::default())
        }
    }
}

pub fn load_or_init_at(path: &Path) -> Result<Settings> {
    if !path.exists() {
        let default_settings = Settings::default();
        if let Err(e) = write_default(path, &default_settings) {
            tracing::warn!("{:#}; using default settings", e);
        }
        return Ok(default_settings);
    }

    let data = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let settings: Settings =
        toml::from_str(&data).with_context(|| format!("parse {}", path.display()))?;
    Ok(settings)
}

fn write_default(path: &Path, settings: &Settings) -> Result<()> {
    let toml = toml::to_string_pretty(settings)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create config dir {}", parent.display()))?;
    }
    fs::write(path, toml).with_context(|| format!("write {}", path.display()))?;
    tracing::info!("created default config at {}", path.display());
    Ok(())
}

/// Cache root selected by the value of `$LFS`; unset or empty means the default.
pub fn cache_root_from_env_value(value: Option<OsString>) -> Option<PathBuf> {
    value.filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// Everything a run needs, resolved once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    pub cache_root: PathBuf,
    /// Where verified files land: `cache_root/sources`.
    pub sources_dir: PathBuf,
    pub packages_manifest: PathBuf,
    pub patches_manifest: PathBuf,
    pub transport: TransportSettings,
    pub batch: BatchOptions,
}

impl FetchConfig {
    /// Resolve from the process environment: `$LFS` selects the cache root and
    /// manifests are looked up in `cwd`.
    pub fn from_env(cwd: &Path, settings: &Settings) -> Self {
        let root = cache_root_from_env_value(std::env::var_os(CACHE_ROOT_ENV));
        Self::resolve(root, cwd, settings)
    }

    /// Same as [`FetchConfig::from_env`] with an explicit cache root (`None` = default).
    pub fn resolve(cache_root: Option<PathBuf>, cwd: &Path, settings: &Settings) -> Self {
        let cache_root = cache_root.unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_ROOT));
        Self {
            sources_dir: cache_root.join(SOURCES_SUBDIR),
            cache_root,
            packages_manifest: cwd.join(ManifestKind::Packages.file_name()),
            patches_manifest: cwd.join(ManifestKind::Patches.file_name()),
            transport: settings.transport(),
            batch: settings.batch(),
        }
    }

    pub fn manifest_path(&self, kind: ManifestKind) -> &Path {
        match kind {
            ManifestKind::Packages => &self.packages_manifest,
            ManifestKind::Patches => &self.patches_manifest,
        }
    }
}
