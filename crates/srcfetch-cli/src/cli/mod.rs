//! CLI for srcfetch.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::{run_checksum, run_completions, run_fetch, FetchOverrides};

/// Without a subcommand, fetches every entry of `system_package_list.toml`
/// and then `package_patch_list.toml` (both in the current directory) into
/// `$LFS/sources`.
#[derive(Debug, Parser)]
#[command(name = "srcfetch")]
#[command(about = "srcfetch: fetch and verify source packages and patches", long_about = None)]
pub struct Cli {
    /// Cache root; overrides $LFS. Files land in <PATH>/sources.
    #[arg(long, value_name = "PATH")]
    pub cache_root: Option<PathBuf>,

    /// Fetch up to N items at once (default from config, normally 1).
    #[arg(long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Skip items whose download fails and report them at the end. Checksum mismatches still stop the run.
    #[arg(long)]
    pub keep_going: bool,

    /// Mirror log output to stderr at debug level.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Print the MD5 of a file, in manifest form.
    Checksum {
        /// Path to the file.
        path: PathBuf,
    },

    /// Print shell completions to stdout.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            None => run_fetch(&FetchOverrides {
                cache_root: self.cache_root,
                jobs: self.jobs,
                keep_going: self.keep_going,
            })?,
            Some(CliCommand::Checksum { path }) => run_checksum(&path)?,
            Some(CliCommand::Completions { shell }) => run_completions(shell),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
