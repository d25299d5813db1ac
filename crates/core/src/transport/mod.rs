//! Fetching item sources to local disk.

mod error;
mod torrent;

pub use error::TransportError;
pub(crate) use torrent::magnet_display_name;
pub use torrent::TorrentTransport;

use async_trait::async_trait;
use std::path::PathBuf;

/// A source fetched to local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    /// File (or directory, for multi-file torrents) on local disk.
    pub path: PathBuf,
    /// Transport-specific handle used by `cleanup`, e.g. an info hash.
    pub handle: Option<String>,
}

impl Download {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            handle: None,
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }
}

/// Fetches an opaque locator to a local path.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logging.
    fn name(&self) -> &str;

    /// Fetch `locator` and return where it landed. `suggested_name` is used
    /// when the locator itself carries no usable name.
    async fn download(
        &self,
        locator: &str,
        suggested_name: &str,
    ) -> Result<Download, TransportError>;

    /// Release transport resources for a finished download.
    /// With `delete_files`, the downloaded data is removed too.
    async fn cleanup(&self, download: &Download, delete_files: bool) -> Result<(), TransportError>;
}
