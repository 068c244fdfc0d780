//! Single-stream GET via libcurl, written sequentially to the destination file.

use super::{Transport, TransportError, TransportSettings};
use std::fs::File;
use std::io::Write;
use std::path::Path;

const USER_AGENT: &str = concat!("srcfetch/", env!("CARGO_PKG_VERSION"));

/// libcurl easy-handle transport. One handle per download, no connection reuse.
#[derive(Debug, Clone, Default)]
pub struct CurlTransport {
    settings: TransportSettings,
}

impl CurlTransport {
    pub fn new(settings: TransportSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }
}

impl Transport for CurlTransport {
    fn download(&self, url: &str, dest: &Path) -> Result<u64, TransportError> {
        let mut file = File::create(dest).map_err(TransportError::Storage)?;
        let mut written = 0u64;
        let mut storage_error: Option<std::io::Error> = None;

        let mut easy = curl::easy::Easy::new();
        easy.url(url)?;
        easy.useragent(USER_AGENT)?;
        easy.follow_location(true)?;
        easy.max_redirections(10)?;
        easy.connect_timeout(self.settings.connect_timeout)?;
        easy.low_speed_limit(self.settings.low_speed_limit)?;
        easy.low_speed_time(self.settings.low_speed_time)?;
        easy.timeout(self.settings.timeout)?;

        let perform_result = {
            let mut transfer = easy.transfer();
            transfer.write_function(|data| match file.write_all(data) {
                Ok(()) => {
                    written += data.len() as u64;
                    Ok(data.len())
                }
                Err(e) => {
                    storage_error = Some(e);
                    // Short count makes curl abort with a write error.
                    Ok(0)
                }
            })?;
            transfer.perform()
        };

        if let Err(e) = perform_result {
            if e.is_write_error() {
                if let Some(io_err) = storage_error.take() {
                    return Err(TransportError::Storage(io_err));
                }
            }
            return Err(TransportError::Curl(e));
        }

        if is_http(url) {
            let code = easy.response_code()?;
            if !(200..300).contains(&code) {
                return Err(TransportError::Http(code));
            }
        }

        // -1 when the server sent no Content-Length.
        let advertised = easy.content_length_download()?;
        if advertised >= 0.0 && advertised as u64 != written {
            return Err(TransportError::PartialTransfer {
                expected: advertised as u64,
                received: written,
            });
        }

        file.flush().map_err(TransportError::Storage)?;
        tracing::debug!(url, bytes = written, dest = %dest.display(), "transfer complete");
        Ok(written)
    }
}

fn is_http(url: &str) -> bool {
    let lower = url.get(..8).unwrap_or(url).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}
