//! RSS feed fetching.

use std::time::Duration;

use async_trait::async_trait;
use regex_lite::Regex;
use reqwest::Client;
use tracing::debug;

use super::PollerError;
use crate::config::PollerConfig;
use crate::retry::{retry_with_backoff, RetryConfig};

/// One announced release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    /// Locator handed to the transport (magnet or `.torrent` URL).
    pub link: String,
}

impl FeedEntry {
    pub fn new(title: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
        }
    }
}

/// Source of feed entries, newest first.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Returns the name of this source implementation.
    fn name(&self) -> &str;

    async fn fetch(&self, feed_url: &str) -> Result<Vec<FeedEntry>, PollerError>;
}

/// Fetches RSS 2.0 feeds over HTTP.
pub struct HttpFeedSource {
    client: Client,
    retry: RetryConfig,
}

impl HttpFeedSource {
    pub fn new(config: &PollerConfig, retry: RetryConfig) -> Result<Self, PollerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, retry })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    fn name(&self) -> &str {
        "rss"
    }

    async fn fetch(&self, feed_url: &str) -> Result<Vec<FeedEntry>, PollerError> {
        let body = retry_with_backoff(&self.retry, "fetch_feed", || async move {
            let response = self.client.get(feed_url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(PollerError::HttpStatus {
                    url: feed_url.to_string(),
                    status: status.as_u16(),
                });
            }
            Ok(response.text().await?)
        })
        .await?;

        let entries = parse_rss(&body);
        debug!(feed = feed_url, entries = entries.len(), "Fetched feed");
        Ok(entries)
    }
}

/// Extract `<item>` entries from an RSS document, in document order.
///
/// Entries without a title or a locator are dropped. The locator is the
/// item's `<link>`, or its `<enclosure url=..>` when there is no link.
pub fn parse_rss(xml: &str) -> Vec<FeedEntry> {
    let (Ok(item_re), Ok(title_re), Ok(link_re), Ok(enclosure_re)) = (
        Regex::new(r"(?s)<item(?:\s[^>]*)?>(.*?)</item>"),
        Regex::new(r"(?s)<title(?:\s[^>]*)?>(.*?)</title>"),
        Regex::new(r"(?s)<link(?:\s[^>]*)?>(.*?)</link>"),
        Regex::new(r#"<enclosure\s[^>]*url\s*=\s*["']([^"']+)["']"#),
    ) else {
        return Vec::new();
    };

    item_re
        .captures_iter(xml)
        .filter_map(|item| {
            let body = item.get(1)?.as_str();
            let title = title_re
                .captures(body)
                .and_then(|c| c.get(1))
                .map(|m| text(m.as_str()))
                .filter(|t| !t.is_empty())?;
            let link = link_re
                .captures(body)
                .and_then(|c| c.get(1))
                .map(|m| text(m.as_str()))
                .filter(|l| !l.is_empty())
                .or_else(|| {
                    enclosure_re
                        .captures(body)
                        .and_then(|c| c.get(1))
                        .map(|m| unescape(m.as_str()))
                })?;
            Some(FeedEntry { title, link })
        })
        .collect()
}

/// Element text with CDATA unwrapped and entities decoded.
fn text(raw: &str) -> String {
    let raw = raw.trim();
    match raw
        .strip_prefix("<![CDATA[")
        .and_then(|s| s.strip_suffix("]]>"))
    {
        Some(cdata) => cdata.trim().to_string(),
        None => unescape(raw),
    }
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
