use thiserror::Error;

use crate::retry::Retryable;

/// Errors from fetching or reading a feed.
#[derive(Debug, Error)]
pub enum PollerError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("HTTP status {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Invalid title pattern: {0}")]
    InvalidPattern(String),
}

impl From<reqwest::Error> for PollerError {
    fn from(e: reqwest::Error) -> Self {
        PollerError::Http(e.to_string())
    }
}

impl Retryable for PollerError {
    fn is_retryable(&self) -> bool {
        match self {
            PollerError::Http(_) => true,
            PollerError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            PollerError::InvalidPattern(_) => false,
        }
    }
}
