//! Default command: fetch the package table, then the patch table.

use anyhow::{Context, Result};
use srcfetch_core::batch::{run_manifest, TransportFailurePolicy};
use srcfetch_core::config::{self, FetchConfig, Settings};
use srcfetch_core::manifest::{Manifest, ManifestKind};
use srcfetch_core::transport::CurlTransport;
use srcfetch_core::Fetcher;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Command-line values that take precedence over the config file and `$LFS`.
#[derive(Debug, Clone, Default)]
pub struct FetchOverrides {
    pub cache_root: Option<PathBuf>,
    pub jobs: Option<usize>,
    pub keep_going: bool,
}

/// Build the run configuration from settings, environment and overrides.
pub fn fetch_config(cwd: &Path, settings: &Settings, overrides: &FetchOverrides) -> FetchConfig {
    let mut cfg = match &overrides.cache_root {
        Some(root) => FetchConfig::resolve(Some(root.clone()), cwd, settings),
        None => FetchConfig::from_env(cwd, settings),
    };
    if let Some(jobs) = overrides.jobs {
        cfg.batch.jobs = jobs.max(1);
    }
    if overrides.keep_going {
        cfg.batch.transport_failures = TransportFailurePolicy::Continue;
    }
    cfg
}

pub fn run_fetch(overrides: &FetchOverrides) -> Result<()> {
    let settings = config::load_or_init().context("load settings")?;
    let cwd = std::env::current_dir()?;
    let cfg = fetch_config(&cwd, &settings, overrides);
    tracing::debug!("resolved config: {:?}", cfg);

    // Both manifests are read before any network access.
    let manifests = [ManifestKind::Packages, ManifestKind::Patches]
        .into_iter()
        .map(|kind| Manifest::load(cfg.manifest_path(kind), kind))
        .collect::<Result<Vec<_>, _>>()?;

    let fetcher = Fetcher::new(&cfg.sources_dir, Arc::new(CurlTransport::new(cfg.transport)))
        .with_context(|| format!("prepare cache directory {}", cfg.sources_dir.display()))?;

    let mut failed = Vec::new();
    for manifest in &manifests {
        println!("{}", manifest.kind.header());
        let report = run_manifest(&fetcher, manifest, &cfg.batch, |line| println!("{line}"))?;
        tracing::info!(
            fetched = report.fetched,
            skipped = report.skipped,
            failed = report.failures.len(),
            "finished {}",
            manifest.kind.file_name()
        );
        failed.extend(report.failures);
    }

    if !failed.is_empty() {
        for e in &failed {
            eprintln!("failed: {e}");
        }
        anyhow::bail!("{} item(s) could not be fetched", failed.len());
    }
    Ok(())
}
