//! Library directory publisher.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use super::{PublishError, Publisher};
use crate::config::PublisherConfig;
use crate::ledger::ItemKey;

/// Moves encoded files into `<library>/<series_id>/<variant>/`.
///
/// The returned reference is the path relative to the library root.
pub struct DirectoryPublisher {
    library_dir: PathBuf,
}

impl DirectoryPublisher {
    pub fn new(config: &PublisherConfig) -> Self {
        Self {
            library_dir: config.library_dir.clone(),
        }
    }

    pub fn library_dir(&self) -> &Path {
        &self.library_dir
    }

    /// Rename, falling back to copy-and-delete across filesystems.
    async fn move_file(source: &Path, destination: &Path) -> Result<(), PublishError> {
        let place_failed = |error| PublishError::PlaceFailed {
            from: source.to_path_buf(),
            to: destination.to_path_buf(),
            error,
        };

        match fs::rename(source, destination).await {
            Ok(()) => Ok(()),
            // EXDEV is 18 on Linux
            Err(e)
                if e.kind() == std::io::ErrorKind::CrossesDevices || e.raw_os_error() == Some(18) =>
            {
                debug!(source = %source.display(), "Cross-device move, copying");
                fs::copy(source, destination).await.map_err(place_failed)?;
                fs::remove_file(source).await.map_err(place_failed)?;
                Ok(())
            }
            Err(e) => Err(place_failed(e)),
        }
    }
}

#[async_trait]
impl Publisher for DirectoryPublisher {
    fn name(&self) -> &str {
        "directory"
    }

    async fn publish(
        &self,
        item: &ItemKey,
        variant: &str,
        path: &Path,
    ) -> Result<String, PublishError> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            return Err(PublishError::SourceNotFound {
                path: path.to_path_buf(),
            });
        }
        let file_name = path.file_name().ok_or_else(|| PublishError::SourceNotFound {
            path: path.to_path_buf(),
        })?;

        let relative = Path::new(&item.series_id).join(variant).join(file_name);
        let destination = self.library_dir.join(&relative);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PublishError::DirectoryCreationFailed {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        Self::move_file(path, &destination).await?;

        let external_ref = relative.to_string_lossy().into_owned();
        info!(item = %item, variant, external_ref = %external_ref, "Published variant");
        Ok(external_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publisher(dir: &Path) -> DirectoryPublisher {
        DirectoryPublisher::new(&PublisherConfig {
            library_dir: dir.join("library"),
        })
    }

    #[tokio::test]
    async fn test_publish_moves_into_library() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("encode").join("Show - 07 [720p].mkv");
        std::fs::create_dir_all(source.parent().unwrap()).unwrap();
        std::fs::write(&source, b"encoded").unwrap();

        let publisher = publisher(dir.path());
        let key = ItemKey::new("show", "7");
        let external_ref = publisher.publish(&key, "720", &source).await.unwrap();

        assert_eq!(
            external_ref,
            Path::new("show")
                .join("720")
                .join("Show - 07 [720p].mkv")
                .to_string_lossy()
        );
        assert!(!source.exists());
        let placed = publisher.library_dir().join(&external_ref);
        assert_eq!(std::fs::read(placed).unwrap(), b"encoded");
    }

    #[tokio::test]
    async fn test_publish_overwrites_previous_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = publisher(dir.path());
        let key = ItemKey::new("show", "1");

        for content in [&b"first"[..], &b"second"[..]] {
            let source = dir.path().join("ep.mkv");
            std::fs::write(&source, content).unwrap();
            publisher.publish(&key, "480", &source).await.unwrap();
        }

        let placed = publisher.library_dir().join("show/480/ep.mkv");
        assert_eq!(std::fs::read(placed).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_publish_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = publisher(dir.path());
        let result = publisher
            .publish(&ItemKey::new("show", "1"), "480", &dir.path().join("nope.mkv"))
            .await;
        assert!(matches!(result, Err(PublishError::SourceNotFound { .. })));
    }
}
