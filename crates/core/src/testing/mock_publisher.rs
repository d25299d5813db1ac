//! Mock publisher for testing.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::ledger::ItemKey;
use crate::publisher::{PublishError, Publisher};

/// A recorded publish for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedVariant {
    pub item: ItemKey,
    pub variant: String,
    /// Path the encoder produced.
    pub path: PathBuf,
    /// Reference handed back to the caller.
    pub external_ref: String,
}

/// Mock implementation of the Publisher trait.
///
/// Checks the encoded file exists, records the call and returns a unique
/// `mock://` reference. Individual variants can be made to fail.
#[derive(Debug, Default)]
pub struct MockPublisher {
    published: Arc<RwLock<Vec<PublishedVariant>>>,
    failing_variants: Arc<RwLock<HashSet<String>>>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every publish of `variant` until cleared.
    pub async fn fail_variant(&self, variant: impl Into<String>) {
        self.failing_variants.write().await.insert(variant.into());
    }

    pub async fn clear_failures(&self) {
        self.failing_variants.write().await.clear();
    }

    /// Get all successful publishes.
    pub async fn published(&self) -> Vec<PublishedVariant> {
        self.published.read().await.clone()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn publish(
        &self,
        item: &ItemKey,
        variant: &str,
        path: &Path,
    ) -> Result<String, PublishError> {
        if self.failing_variants.read().await.contains(variant) {
            return Err(PublishError::Rejected(format!(
                "mock rejected variant {}",
                variant
            )));
        }
        if !path.exists() {
            return Err(PublishError::SourceNotFound {
                path: path.to_path_buf(),
            });
        }

        let mut published = self.published.write().await;
        let external_ref = format!(
            "mock://{}/{}/{}/{}",
            item.series_id,
            item.episode_no,
            variant,
            published.len() + 1
        );
        published.push(PublishedVariant {
            item: item.clone(),
            variant: variant.to_string(),
            path: path.to_path_buf(),
            external_ref: external_ref.clone(),
        });
        Ok(external_ref)
    }
}
