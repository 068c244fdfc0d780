//! `srcfetch checksum` – print the MD5 of a local file.

use anyhow::{Context, Result};
use srcfetch_core::checksum;
use std::path::Path;

/// Compute and print MD5 of the given file.
pub fn run_checksum(path: &Path) -> Result<()> {
    let digest =
        checksum::md5_path(path).with_context(|| format!("read {}", path.display()))?;
    println!("{}  {}", digest, path.display());
    Ok(())
}
