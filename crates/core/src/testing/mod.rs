//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of every collaborator trait,
//! allowing the pipeline to be exercised end to end without ffmpeg, a
//! torrent swarm or a real publish target.
//!
//! # Example
//!
//! ```rust,ignore
//! use encodarr_core::testing::{fixtures, MockEncoder, MockPublisher, MockTransport};
//!
//! let encoder = Arc::new(MockEncoder::new().failing_variant("1080"));
//! let transport = Arc::new(MockTransport::new(dir.path()));
//! let publisher = Arc::new(MockPublisher::new());
//!
//! let outcome = coordinator.process(fixtures::item("show", "01"), ProcessMode::Normal).await;
//! ```

mod mock_encoder;
mod mock_feed_source;
mod mock_publisher;
mod mock_torrent_client;
mod mock_transport;

pub use mock_encoder::{MockEncoder, MockProbe};
pub use mock_feed_source::MockFeedSource;
pub use mock_publisher::{MockPublisher, PublishedVariant};
pub use mock_torrent_client::MockTorrentClient;
pub use mock_transport::{MockTransport, RecordedDownload};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::config::{EncodeProfile, EncoderConfig};
    use crate::ledger::ItemKey;
    use crate::pipeline::Item;
    use crate::poller::FeedEntry;

    /// An item with a fansub-style title and a magnet locator.
    pub fn item(series_id: &str, episode_no: &str) -> Item {
        Item::new(
            ItemKey::new(series_id, episode_no),
            format!("[Sub] {} - {} [1080p]", series_id, episode_no),
            format!("magnet:?xt=urn:btih:{}{}", series_id, episode_no),
        )
    }

    /// A feed entry announcing `item`.
    pub fn feed_entry(item: &Item) -> FeedEntry {
        FeedEntry::new(item.title.clone(), item.locator.clone())
    }

    /// A profile that runs `script` under `sh`, with `$0` bound to the
    /// output path, `$1` to the input and `$2` to the progress file.
    pub fn sh_profile(script: &str) -> EncodeProfile {
        EncodeProfile {
            program: Some("sh".to_string()),
            args: vec![
                "-c".to_string(),
                script.to_string(),
                "{output}".to_string(),
                "{input}".to_string(),
                "{progress}".to_string(),
            ],
        }
    }

    /// A shell script that writes ffmpeg-style progress blocks, then the
    /// output file.
    pub fn progress_script(blocks: u32, step_secs: f64) -> String {
        format!(
            r#"i=1
while [ $i -le {blocks} ]; do
  printf 'out_time_ms=%d\ntotal_size=%d\nprogress=continue\n' $((i * 1000000)) $((i * 1024)) >> "$2"
  sleep {step_secs}
  i=$((i + 1))
done
printf 'progress=end\n' >> "$2"
printf encoded > "$0""#,
            blocks = blocks,
            step_secs = step_secs
        )
    }

    /// Encoder config with a fast poll interval and one `sh` profile per
    /// variant.
    pub fn sh_encoder_config(variants: &[&str], script: &str) -> EncoderConfig {
        variants.iter().fold(
            EncoderConfig::default().with_poll_interval_ms(20),
            |config, variant| config.with_profile(*variant, sh_profile(script)),
        )
    }
}
