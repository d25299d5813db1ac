//! Mock transport for testing.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::transport::{Download, Transport, TransportError};

/// A recorded download call for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedDownload {
    pub locator: String,
    pub suggested_name: String,
}

/// Mock implementation of the Transport trait.
///
/// Each download writes a small file named after the suggested name into
/// the download directory. Failures and latency can be injected.
#[derive(Debug)]
pub struct MockTransport {
    download_dir: PathBuf,
    downloads: Arc<RwLock<Vec<RecordedDownload>>>,
    /// `delete_files` flag of each cleanup call.
    cleanups: Arc<RwLock<Vec<bool>>>,
    /// If set, the next download fails with this message.
    next_error: Arc<RwLock<Option<String>>>,
    delay: Arc<RwLock<Duration>>,
}

impl MockTransport {
    /// Create a mock transport that writes into `download_dir`.
    pub fn new(download_dir: impl AsRef<Path>) -> Self {
        Self {
            download_dir: download_dir.as_ref().to_path_buf(),
            downloads: Arc::new(RwLock::new(Vec::new())),
            cleanups: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            delay: Arc::new(RwLock::new(Duration::ZERO)),
        }
    }

    /// Make the next download fail.
    pub async fn fail_next(&self, message: impl Into<String>) {
        *self.next_error.write().await = Some(message.into());
    }

    /// Simulated download time.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    /// Get all recorded download calls.
    pub async fn downloads(&self) -> Vec<RecordedDownload> {
        self.downloads.read().await.clone()
    }

    pub async fn download_count(&self) -> usize {
        self.downloads.read().await.len()
    }

    /// `delete_files` flag of each cleanup call, in order.
    pub async fn cleanups(&self) -> Vec<bool> {
        self.cleanups.read().await.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn download(
        &self,
        locator: &str,
        suggested_name: &str,
    ) -> Result<Download, TransportError> {
        self.downloads.write().await.push(RecordedDownload {
            locator: locator.to_string(),
            suggested_name: suggested_name.to_string(),
        });

        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = self.next_error.write().await.take() {
            return Err(TransportError::Http(message));
        }

        let file_name = format!("{}.mkv", suggested_name.replace(['/', '\\'], "_"));
        let path = self.download_dir.join(file_name);
        tokio::fs::create_dir_all(&self.download_dir).await?;
        tokio::fs::write(&path, b"mock source").await?;

        Ok(Download::new(path).with_handle(locator))
    }

    async fn cleanup(&self, download: &Download, delete_files: bool) -> Result<(), TransportError> {
        self.cleanups.write().await.push(delete_files);
        if delete_files {
            match tokio::fs::remove_file(&download.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
