//! Torrent-backed transport.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{Download, Transport, TransportError};
use crate::config::TorrentConfig;
use crate::metrics;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::torrent::{AddTorrentRequest, TorrentClient, TorrentInfo};

/// Fetches magnet links and `.torrent` URLs through a [`TorrentClient`].
pub struct TorrentTransport {
    client: Arc<dyn TorrentClient>,
    http: reqwest::Client,
    retry: RetryConfig,
    poll_interval: Duration,
    completion_timeout: Duration,
}

impl TorrentTransport {
    pub fn new(client: Arc<dyn TorrentClient>, config: &TorrentConfig, retry: RetryConfig) -> Self {
        Self {
            client,
            http: reqwest::Client::new(),
            retry,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            completion_timeout: Duration::from_secs(config.completion_timeout_secs),
        }
    }

    async fn fetch_torrent_file(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        retry_with_backoff(&self.retry, "fetch_torrent_file", || async move {
            let response = self.http.get(url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::HttpStatus {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }
            Ok(response.bytes().await?.to_vec())
        })
        .await
    }

    async fn add(&self, locator: &str, suggested_name: &str) -> Result<String, TransportError> {
        let request = if locator.starts_with("magnet:?") {
            AddTorrentRequest::magnet(locator)
        } else if locator.starts_with("http://") || locator.starts_with("https://") {
            let data = self.fetch_torrent_file(locator).await?;
            AddTorrentRequest::torrent_file(data).with_filename(suggested_name)
        } else {
            return Err(TransportError::UnsupportedLocator(locator.to_string()));
        };

        let added = retry_with_backoff(&self.retry, "add_torrent", || {
            let request = request.clone();
            async move {
                self.client
                    .add_torrent(request)
                    .await
                    .map_err(TransportError::from)
            }
        })
        .await?;
        Ok(added.hash)
    }

    async fn wait_for_completion(&self, hash: &str) -> Result<TorrentInfo, TransportError> {
        let poll = async {
            loop {
                let info = self.client.get_torrent(hash).await?;
                if info.is_complete() {
                    return Ok::<_, TransportError>(info);
                }
                debug!(
                    hash,
                    progress = info.progress,
                    eta_secs = ?info.eta_secs,
                    "Download in progress"
                );
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        tokio::time::timeout(self.completion_timeout, poll)
            .await
            .map_err(|_| TransportError::Timeout(self.completion_timeout.as_secs()))?
    }
}

#[async_trait]
impl Transport for TorrentTransport {
    fn name(&self) -> &str {
        self.client.name()
    }

    async fn download(
        &self,
        locator: &str,
        suggested_name: &str,
    ) -> Result<Download, TransportError> {
        let label = magnet_display_name(locator).unwrap_or_else(|| suggested_name.to_string());
        info!(name = %label, "Starting download");

        let result = async {
            let hash = self.add(locator, suggested_name).await?;
            let info = match self.wait_for_completion(&hash).await {
                Ok(info) => info,
                Err(e) => {
                    if let Err(remove_err) = self.client.remove_torrent(&hash, true).await {
                        warn!(hash = %hash, error = %remove_err, "Failed to remove stalled torrent");
                    }
                    return Err(e);
                }
            };

            let path = PathBuf::from(&info.save_path).join(&info.name);
            if !path.exists() {
                return Err(TransportError::Missing(path.display().to_string()));
            }
            Ok(Download::new(path).with_handle(hash))
        }
        .await;

        match &result {
            Ok(download) => {
                metrics::DOWNLOADS_TOTAL.with_label_values(&["success"]).inc();
                info!(name = %label, path = %download.path.display(), "Download finished");
            }
            Err(e) => {
                metrics::DOWNLOADS_TOTAL.with_label_values(&["failed"]).inc();
                warn!(name = %label, error = %e, "Download failed");
            }
        }
        result
    }

    async fn cleanup(&self, download: &Download, delete_files: bool) -> Result<(), TransportError> {
        let Some(hash) = &download.handle else {
            return Ok(());
        };
        self.client.remove_torrent(hash, delete_files).await?;
        debug!(hash = %hash, delete_files, "Torrent cleaned up");
        Ok(())
    }
}

/// The `dn` (display name) parameter of a magnet link, percent-decoded.
pub(crate) fn magnet_display_name(locator: &str) -> Option<String> {
    let query = locator.strip_prefix("magnet:?")?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "dn")
        .and_then(|(_, value)| {
            urlencoding::decode(&value.replace('+', " "))
                .ok()
                .map(|s| s.into_owned())
        })
        .filter(|name| !name.is_empty())
}
