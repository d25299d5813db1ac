//! Types for torrent client operations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during torrent client operations.
#[derive(Debug, Error)]
pub enum TorrentClientError {
    #[error("Session initialization failed: {0}")]
    SessionFailed(String),

    #[error("Torrent not found: {0}")]
    TorrentNotFound(String),

    #[error("Invalid torrent data: {0}")]
    InvalidTorrent(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Timed out waiting for torrent metadata")]
    MetadataTimeout,
}

/// State of a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentState {
    /// Downloading from peers.
    Downloading,
    /// All pieces present.
    Seeding,
    Paused,
    /// Checking file integrity.
    Checking,
    Error,
}

impl TorrentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TorrentState::Downloading => "downloading",
            TorrentState::Seeding => "seeding",
            TorrentState::Paused => "paused",
            TorrentState::Checking => "checking",
            TorrentState::Error => "error",
        }
    }
}

/// Information about a torrent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentInfo {
    /// Info hash (lowercase hex).
    pub hash: String,
    /// Torrent name; also the file or directory name under `save_path`.
    pub name: String,
    pub state: TorrentState,
    /// Download progress (0.0 - 1.0).
    pub progress: f64,
    pub size_bytes: u64,
    pub downloaded_bytes: u64,
    /// Current download speed in bytes/second.
    pub download_speed: u64,
    /// ETA in seconds (None if unknown or complete).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<u64>,
    /// Directory the torrent is saved under.
    pub save_path: String,
    /// Every piece has been verified.
    pub finished: bool,
}

impl TorrentInfo {
    /// Finished, or close enough that the last bytes are padding.
    pub fn is_complete(&self) -> bool {
        self.finished || self.progress >= 0.999
    }
}

/// Request to add a new torrent.
#[derive(Debug, Clone)]
pub enum AddTorrentRequest {
    /// Add via magnet URI.
    Magnet { uri: String },
    /// Add via .torrent file contents.
    TorrentFile {
        data: Vec<u8>,
        /// Original filename (for logging).
        filename: Option<String>,
    },
}

impl AddTorrentRequest {
    pub fn magnet(uri: impl Into<String>) -> Self {
        AddTorrentRequest::Magnet { uri: uri.into() }
    }

    pub fn torrent_file(data: Vec<u8>) -> Self {
        AddTorrentRequest::TorrentFile {
            data,
            filename: None,
        }
    }

    pub fn with_filename(mut self, name: impl Into<String>) -> Self {
        if let AddTorrentRequest::TorrentFile { filename, .. } = &mut self {
            *filename = Some(name.into());
        }
        self
    }
}

/// Result of adding a torrent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTorrentResult {
    /// Info hash of the added torrent.
    pub hash: String,
    /// Name of the torrent (may be unknown for magnets initially).
    pub name: Option<String>,
}

/// Trait for torrent client backends.
#[async_trait]
pub trait TorrentClient: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Add a new torrent and start downloading it.
    async fn add_torrent(
        &self,
        request: AddTorrentRequest,
    ) -> Result<AddTorrentResult, TorrentClientError>;

    /// Get a specific torrent by hash.
    async fn get_torrent(&self, hash: &str) -> Result<TorrentInfo, TorrentClientError>;

    /// Remove a torrent.
    /// If `delete_files` is true, also delete downloaded files.
    async fn remove_torrent(&self, hash: &str, delete_files: bool)
        -> Result<(), TorrentClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(progress: f64, finished: bool) -> TorrentInfo {
        TorrentInfo {
            hash: "abc123".to_string(),
            name: "[Sub] Show - 07 [1080p].mkv".to_string(),
            state: TorrentState::Downloading,
            progress,
            size_bytes: 1000,
            downloaded_bytes: (1000.0 * progress) as u64,
            download_speed: 0,
            eta_secs: None,
            save_path: "/downloads".to_string(),
            finished,
        }
    }

    #[test]
    fn test_torrent_state_serialization() {
        assert_eq!(
            serde_json::to_string(&TorrentState::Downloading).unwrap(),
            "\"downloading\""
        );
        assert_eq!(TorrentState::Seeding.as_str(), "seeding");
    }

    #[test]
    fn test_is_complete_threshold() {
        assert!(!info(0.5, false).is_complete());
        assert!(!info(0.998, false).is_complete());
        assert!(info(0.999, false).is_complete());
        assert!(info(0.2, true).is_complete());
    }

    #[test]
    fn test_add_request_builders() {
        match AddTorrentRequest::magnet("magnet:?xt=urn:btih:abc") {
            AddTorrentRequest::Magnet { uri } => assert_eq!(uri, "magnet:?xt=urn:btih:abc"),
            other => panic!("unexpected {:?}", other),
        }

        match AddTorrentRequest::torrent_file(vec![1, 2, 3]).with_filename("ep.torrent") {
            AddTorrentRequest::TorrentFile { data, filename } => {
                assert_eq!(data.len(), 3);
                assert_eq!(filename.as_deref(), Some("ep.torrent"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
