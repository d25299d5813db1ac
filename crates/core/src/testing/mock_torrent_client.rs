//! Mock torrent client for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::torrent::{
    AddTorrentRequest, AddTorrentResult, TorrentClient, TorrentClientError, TorrentInfo,
    TorrentState,
};
use crate::transport::magnet_display_name;

/// Internal state for a mock torrent.
#[derive(Debug, Clone)]
struct MockTorrent {
    info: TorrentInfo,
    polls: u32,
}

/// Mock implementation of the TorrentClient trait.
///
/// Added torrents are "downloaded" instantly: a small file named after the
/// torrent is written into the save directory, and the torrent reports
/// complete after a configurable number of status polls.
///
/// # Example
///
/// ```rust,ignore
/// let client = MockTorrentClient::new(dir.path()).with_polls_until_done(3);
///
/// // First two adds fail with a retryable metadata timeout.
/// client.fail_next_adds(2).await;
///
/// let transport = TorrentTransport::new(Arc::new(client), &config, retry);
/// ```
#[derive(Debug)]
pub struct MockTorrentClient {
    save_path: PathBuf,
    /// Polls of `get_torrent` before a torrent reports finished.
    polls_until_done: u32,
    /// Torrents never finish.
    stalled: bool,
    torrents: Arc<RwLock<HashMap<String, MockTorrent>>>,
    /// Successful add requests.
    added: Arc<RwLock<Vec<AddTorrentRequest>>>,
    /// (hash, delete_files) for each removal.
    removed: Arc<RwLock<Vec<(String, bool)>>>,
    /// Remaining adds that fail.
    failing_adds: Arc<RwLock<u32>>,
    hash_counter: Arc<RwLock<u32>>,
}

impl MockTorrentClient {
    /// Create a mock client that saves into `save_path`.
    pub fn new(save_path: impl AsRef<Path>) -> Self {
        Self {
            save_path: save_path.as_ref().to_path_buf(),
            polls_until_done: 0,
            stalled: false,
            torrents: Arc::new(RwLock::new(HashMap::new())),
            added: Arc::new(RwLock::new(Vec::new())),
            removed: Arc::new(RwLock::new(Vec::new())),
            failing_adds: Arc::new(RwLock::new(0)),
            hash_counter: Arc::new(RwLock::new(0)),
        }
    }

    /// Torrents report finished on the `n`th status poll.
    pub fn with_polls_until_done(mut self, n: u32) -> Self {
        self.polls_until_done = n;
        self
    }

    /// Torrents never finish.
    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    /// Make the next `n` adds fail with [`TorrentClientError::MetadataTimeout`].
    pub async fn fail_next_adds(&self, n: u32) {
        *self.failing_adds.write().await = n;
    }

    /// Number of successful adds.
    pub async fn added_count(&self) -> usize {
        self.added.read().await.len()
    }

    /// Get all successful add requests.
    pub async fn added(&self) -> Vec<AddTorrentRequest> {
        self.added.read().await.clone()
    }

    /// Get all removals as `(hash, delete_files)`.
    pub async fn removed(&self) -> Vec<(String, bool)> {
        self.removed.read().await.clone()
    }

    async fn generate_hash(&self) -> String {
        let mut counter = self.hash_counter.write().await;
        *counter += 1;
        format!("mockhash{:08x}", *counter)
    }

    /// Extract info hash from magnet URI if present.
    fn extract_hash_from_magnet(uri: &str) -> Option<String> {
        uri.split(['?', '&'])
            .find_map(|part| part.strip_prefix("xt=urn:btih:"))
            .filter(|h| !h.is_empty())
            .map(|h| h.to_lowercase())
    }
}

#[async_trait]
impl TorrentClient for MockTorrentClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn add_torrent(
        &self,
        request: AddTorrentRequest,
    ) -> Result<AddTorrentResult, TorrentClientError> {
        {
            let mut failing = self.failing_adds.write().await;
            if *failing > 0 {
                *failing -= 1;
                return Err(TorrentClientError::MetadataTimeout);
            }
        }

        let (hash, name) = match &request {
            AddTorrentRequest::Magnet { uri } => {
                let hash = match Self::extract_hash_from_magnet(uri) {
                    Some(hash) => hash,
                    None => self.generate_hash().await,
                };
                let name = magnet_display_name(uri);
                (hash, name)
            }
            AddTorrentRequest::TorrentFile { filename, .. } => {
                (self.generate_hash().await, filename.clone())
            }
        };
        let name = name.unwrap_or_else(|| format!("Mock Torrent {}", &hash[..hash.len().min(8)]));

        std::fs::create_dir_all(&self.save_path)
            .and_then(|_| std::fs::write(self.save_path.join(&name), b"mock torrent payload"))
            .map_err(|e| TorrentClientError::ApiError(e.to_string()))?;

        let info = TorrentInfo {
            hash: hash.clone(),
            name: name.clone(),
            state: TorrentState::Downloading,
            progress: 0.0,
            size_bytes: 100 * 1024 * 1024,
            downloaded_bytes: 0,
            download_speed: 1024 * 1024,
            eta_secs: Some(100),
            save_path: self.save_path.display().to_string(),
            finished: false,
        };

        self.torrents
            .write()
            .await
            .insert(hash.clone(), MockTorrent { info, polls: 0 });
        self.added.write().await.push(request);

        Ok(AddTorrentResult {
            hash,
            name: Some(name),
        })
    }

    async fn get_torrent(&self, hash: &str) -> Result<TorrentInfo, TorrentClientError> {
        let mut torrents = self.torrents.write().await;
        let torrent = torrents
            .get_mut(hash)
            .ok_or_else(|| TorrentClientError::TorrentNotFound(hash.to_string()))?;

        torrent.polls += 1;
        if !self.stalled && torrent.polls >= self.polls_until_done {
            torrent.info.progress = 1.0;
            torrent.info.downloaded_bytes = torrent.info.size_bytes;
            torrent.info.state = TorrentState::Seeding;
            torrent.info.finished = true;
            torrent.info.eta_secs = None;
        } else if !self.stalled {
            let progress = torrent.polls as f64 / self.polls_until_done as f64;
            torrent.info.progress = progress;
            torrent.info.downloaded_bytes = (torrent.info.size_bytes as f64 * progress) as u64;
        }

        Ok(torrent.info.clone())
    }

    async fn remove_torrent(
        &self,
        hash: &str,
        delete_files: bool,
    ) -> Result<(), TorrentClientError> {
        let removed = self
            .torrents
            .write()
            .await
            .remove(hash)
            .ok_or_else(|| TorrentClientError::TorrentNotFound(hash.to_string()))?;

        if delete_files {
            let _ = std::fs::remove_file(self.save_path.join(&removed.info.name));
        }
        self.removed
            .write()
            .await
            .push((hash.to_string(), delete_files));
        Ok(())
    }
}
