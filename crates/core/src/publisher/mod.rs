//! Publishing encoded variants.

mod directory;
mod error;

pub use directory::DirectoryPublisher;
pub use error::PublishError;

use async_trait::async_trait;
use std::path::Path;

use crate::ledger::ItemKey;

/// Delivers an encoded variant to its audience.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Returns the name of this publisher implementation.
    fn name(&self) -> &str;

    /// Publish the file at `path` as `variant` of `item`.
    ///
    /// Returns an opaque reference to the published artifact, which is
    /// stored in the completion ledger.
    async fn publish(
        &self,
        item: &ItemKey,
        variant: &str,
        path: &Path,
    ) -> Result<String, PublishError>;
}
