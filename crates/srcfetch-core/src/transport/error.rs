//! Transfer error type.

use thiserror::Error;

/// Failure while moving bytes from the remote into the staging file.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Curl reported an error (timeout, connection, DNS, etc.).
    #[error("{0}")]
    Curl(#[from] curl::Error),
    /// HTTP response had a non-2xx status.
    #[error("HTTP {0}")]
    Http(u32),
    /// Server closed the connection before sending the advertised length.
    #[error("partial transfer: expected {expected} bytes, got {received}")]
    PartialTransfer { expected: u64, received: u64 },
    /// Writing the staging file failed (disk full, permission denied).
    #[error("storage: {0}")]
    Storage(#[source] std::io::Error),
}

impl TransportError {
    /// HTTP status if the server answered with one.
    pub fn http_status(&self) -> Option<u32> {
        match self {
            TransportError::Http(code) => Some(*code),
            _ => None,
        }
    }
}
