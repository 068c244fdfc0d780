//! Moving remote bytes into a local file.
//!
//! The fetcher only depends on the [`Transport`] trait; [`CurlTransport`] is
//! the libcurl-backed implementation used by the CLI.

mod curl_transport;
mod error;

pub use curl_transport::CurlTransport;
pub use error::TransportError;

use std::path::Path;
use std::time::Duration;

/// Downloads a URL into a local file.
pub trait Transport: Send + Sync {
    /// Writes the full response body for `url` into `dest` (created or
    /// truncated) and returns the number of bytes written. A partial file may
    /// be left at `dest` on error; callers own its cleanup.
    fn download(&self, url: &str, dest: &Path) -> Result<u64, TransportError>;
}

/// Timeouts applied to each transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    pub connect_timeout: Duration,
    /// Abort if throughput stays below this many bytes/s for `low_speed_time`.
    pub low_speed_limit: u32,
    pub low_speed_time: Duration,
    /// Hard wall-clock limit for one transfer.
    pub timeout: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            low_speed_limit: 1024,
            low_speed_time: Duration::from_secs(60),
            timeout: Duration::from_secs(3600),
        }
    }
}
