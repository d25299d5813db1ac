//! Error types for publishing.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    /// The encoded file is missing.
    #[error("Encoded file not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    /// Failed to create the destination directory.
    #[error("Failed to create directory: {}", path.display())]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to move or copy the file into place.
    #[error("Failed to place {} at {}: {error}", from.display(), to.display())]
    PlaceFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        error: std::io::Error,
    },

    /// The publish target rejected the artifact.
    #[error("Publish rejected: {0}")]
    Rejected(String),
}
