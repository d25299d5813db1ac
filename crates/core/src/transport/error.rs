use thiserror::Error;

use crate::retry::Retryable;
use crate::torrent::TorrentClientError;

/// Errors from fetching a source.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Unsupported locator: {0}")]
    UnsupportedLocator(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("HTTP status {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Torrent client error: {0}")]
    Client(#[from] TorrentClientError),

    #[error("Download did not complete within {0}s")]
    Timeout(u64),

    #[error("Downloaded file missing: {0}")]
    Missing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Http(e.to_string())
    }
}

impl Retryable for TransportError {
    fn is_retryable(&self) -> bool {
        match self {
            TransportError::Http(_) | TransportError::Io(_) => true,
            TransportError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            TransportError::Client(TorrentClientError::MetadataTimeout) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(TransportError::Http("connection reset".to_string()).is_retryable());
        assert!(TransportError::HttpStatus {
            url: "http://x".to_string(),
            status: 503
        }
        .is_retryable());
        assert!(!TransportError::HttpStatus {
            url: "http://x".to_string(),
            status: 404
        }
        .is_retryable());
        assert!(!TransportError::UnsupportedLocator("ftp://x".to_string()).is_retryable());
        assert!(!TransportError::Timeout(60).is_retryable());
    }
}
