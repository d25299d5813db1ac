//! librqbit embedded torrent client implementation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use librqbit::{
    AddTorrent as RqbitAddTorrent, AddTorrentResponse, ManagedTorrent, Session, SessionOptions,
    SessionPersistenceConfig,
};
use tracing::{debug, info, warn};

use super::{
    AddTorrentRequest, AddTorrentResult, TorrentClient, TorrentClientError, TorrentInfo,
    TorrentState,
};
use crate::config::TorrentConfig;

/// Embedded librqbit torrent client.
pub struct LibrqbitClient {
    session: Arc<Session>,
    download_path: PathBuf,
    metadata_timeout: Duration,
}

impl LibrqbitClient {
    /// Start a session from configuration.
    pub async fn new(config: &TorrentConfig) -> Result<Self, TorrentClientError> {
        let download_path = config.download_path.clone();

        std::fs::create_dir_all(&download_path).map_err(|e| {
            TorrentClientError::SessionFailed(format!(
                "Failed to create download directory: {}",
                e
            ))
        })?;

        let mut opts = SessionOptions::default();

        if !config.enable_dht {
            opts.disable_dht = true;
        }

        // Range, not RangeInclusive
        if let Some(port) = config.listen_port {
            opts.listen_port_range = Some(port..(port + 1));
        }

        if let Some(ref persistence_dir) = config.persistence_path {
            std::fs::create_dir_all(persistence_dir).map_err(|e| {
                TorrentClientError::SessionFailed(format!(
                    "Failed to create persistence directory: {}",
                    e
                ))
            })?;
            opts.persistence = Some(SessionPersistenceConfig::Json {
                folder: Some(persistence_dir.clone()),
            });
        }

        info!(
            download_path = %download_path.display(),
            dht_enabled = !opts.disable_dht,
            "Initializing librqbit session"
        );

        let session = Session::new_with_opts(download_path.clone(), opts)
            .await
            .map_err(|e| {
                TorrentClientError::SessionFailed(format!(
                    "Failed to initialize librqbit session: {}",
                    e
                ))
            })?;

        if let Some(port) = session.tcp_listen_port() {
            info!(port = port, "librqbit listening on TCP port");
        }

        Ok(Self {
            session,
            download_path,
            metadata_timeout: Duration::from_secs(config.metadata_timeout_secs),
        })
    }

    fn format_hash(hash: &librqbit_core::Id20) -> String {
        hash.as_string()
    }

    fn torrent_to_info(&self, torrent: &Arc<ManagedTorrent>) -> TorrentInfo {
        let hash = Self::format_hash(&torrent.info_hash());
        let stats = torrent.stats();

        let name = torrent
            .name()
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("torrent-{}", &hash[..8]));

        let state = Self::map_state(&stats.state, torrent.is_paused(), stats.finished);

        let progress = if stats.total_bytes > 0 {
            stats.progress_bytes as f64 / stats.total_bytes as f64
        } else {
            0.0
        };

        // librqbit's "mbps" field is MiB/s.
        let download_speed = stats
            .live
            .as_ref()
            .map(|live| (live.download_speed.mbps * 1024.0 * 1024.0) as u64)
            .unwrap_or(0);

        let eta_secs = if state == TorrentState::Downloading && download_speed > 0 {
            let remaining = stats.total_bytes.saturating_sub(stats.progress_bytes);
            Some(remaining / download_speed)
        } else {
            None
        };

        TorrentInfo {
            hash,
            name,
            state,
            progress,
            size_bytes: stats.total_bytes,
            downloaded_bytes: stats.progress_bytes,
            download_speed,
            eta_secs,
            save_path: self.download_path.display().to_string(),
            finished: stats.finished,
        }
    }

    fn map_state(
        state: &librqbit::TorrentStatsState,
        is_paused: bool,
        is_finished: bool,
    ) -> TorrentState {
        use librqbit::TorrentStatsState;

        if is_paused {
            return TorrentState::Paused;
        }

        match state {
            TorrentStatsState::Initializing => TorrentState::Checking,
            TorrentStatsState::Live if is_finished => TorrentState::Seeding,
            TorrentStatsState::Live => TorrentState::Downloading,
            TorrentStatsState::Paused => TorrentState::Paused,
            TorrentStatsState::Error => TorrentState::Error,
        }
    }

    fn find_torrent(&self, hash: &str) -> Option<Arc<ManagedTorrent>> {
        let hash_lower = hash.to_lowercase();

        self.session.with_torrents(|iter| {
            for (_, torrent) in iter {
                if Self::format_hash(&torrent.info_hash()) == hash_lower {
                    return Some(torrent.clone());
                }
            }
            None
        })
    }
}

#[async_trait]
impl TorrentClient for LibrqbitClient {
    fn name(&self) -> &str {
        "librqbit"
    }

    async fn add_torrent(
        &self,
        request: AddTorrentRequest,
    ) -> Result<AddTorrentResult, TorrentClientError> {
        let add_torrent = match request {
            AddTorrentRequest::Magnet { uri } => RqbitAddTorrent::from_url(uri),
            AddTorrentRequest::TorrentFile { data, filename } => {
                if data.is_empty() {
                    return Err(TorrentClientError::InvalidTorrent(format!(
                        "empty torrent file {}",
                        filename.unwrap_or_default()
                    )));
                }
                RqbitAddTorrent::from_bytes(data)
            }
        };

        // Magnet metadata lookup over DHT can stall indefinitely.
        let response = tokio::time::timeout(
            self.metadata_timeout,
            self.session.add_torrent(add_torrent, None),
        )
        .await
        .map_err(|_| TorrentClientError::MetadataTimeout)?
        .map_err(|e| TorrentClientError::ApiError(format!("Failed to add torrent: {}", e)))?;

        match response {
            AddTorrentResponse::Added(_, handle) => {
                let hash = Self::format_hash(&handle.info_hash());
                let name = handle.name().map(|s| s.to_string());
                debug!(hash = %hash, name = ?name, "Torrent added");
                Ok(AddTorrentResult { hash, name })
            }
            AddTorrentResponse::AlreadyManaged(_, handle) => {
                let hash = Self::format_hash(&handle.info_hash());
                let name = handle.name().map(|s| s.to_string());
                warn!(hash = %hash, "Torrent already managed");
                Ok(AddTorrentResult { hash, name })
            }
            AddTorrentResponse::ListOnly(_) => Err(TorrentClientError::ApiError(
                "Torrent was added in list-only mode".to_string(),
            )),
        }
    }

    async fn get_torrent(&self, hash: &str) -> Result<TorrentInfo, TorrentClientError> {
        let torrent = self
            .find_torrent(hash)
            .ok_or_else(|| TorrentClientError::TorrentNotFound(hash.to_string()))?;

        Ok(self.torrent_to_info(&torrent))
    }

    async fn remove_torrent(
        &self,
        hash: &str,
        delete_files: bool,
    ) -> Result<(), TorrentClientError> {
        let torrent = self
            .find_torrent(hash)
            .ok_or_else(|| TorrentClientError::TorrentNotFound(hash.to_string()))?;

        self.session
            .delete(torrent.id().into(), delete_files)
            .await
            .map_err(|e| TorrentClientError::ApiError(format!("Failed to remove torrent: {}", e)))?;

        debug!(hash = %hash, delete_files, "Torrent removed");
        Ok(())
    }
}
