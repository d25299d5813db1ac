//! Mock feed source for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::poller::{FeedEntry, FeedSource, PollerError};

/// Mock implementation of the FeedSource trait.
///
/// Serves canned entries per feed URL. Unknown feeds are empty.
#[derive(Debug, Default)]
pub struct MockFeedSource {
    entries: Arc<RwLock<HashMap<String, Vec<FeedEntry>>>>,
    failing: Arc<RwLock<HashSet<String>>>,
    fetches: Arc<RwLock<Vec<String>>>,
}

impl MockFeedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries served for `feed_url`, newest first.
    pub async fn set_entries(&self, feed_url: &str, entries: Vec<FeedEntry>) {
        self.entries
            .write()
            .await
            .insert(feed_url.to_string(), entries);
    }

    /// Make every fetch of `feed_url` fail with a 503.
    pub async fn fail_feed(&self, feed_url: &str) {
        self.failing.write().await.insert(feed_url.to_string());
    }

    pub async fn fetch_count(&self) -> usize {
        self.fetches.read().await.len()
    }
}

#[async_trait]
impl FeedSource for MockFeedSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(&self, feed_url: &str) -> Result<Vec<FeedEntry>, PollerError> {
        self.fetches.write().await.push(feed_url.to_string());
        if self.failing.read().await.contains(feed_url) {
            return Err(PollerError::HttpStatus {
                url: feed_url.to_string(),
                status: 503,
            });
        }
        Ok(self
            .entries
            .read()
            .await
            .get(feed_url)
            .cloned()
            .unwrap_or_default())
    }
}
