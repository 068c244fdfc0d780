//! Fetch source archives and patches listed in TOML manifests, verify their
//! MD5 and stage them into a local cache directory.

pub mod batch;
pub mod checksum;
pub mod config;
pub mod fetcher;
pub mod logging;
pub mod manifest;
pub mod staging;
pub mod transport;
pub mod url_model;

pub use batch::{run_manifest, BatchOptions, BatchReport, ProgressLine, TransportFailurePolicy};
pub use fetcher::{FetchError, FetchOutcome, Fetcher};
pub use manifest::{Manifest, ManifestKind, PackageEntry};
