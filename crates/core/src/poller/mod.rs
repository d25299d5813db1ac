//! Source Poller: turns release feeds into pipeline items.

mod error;
mod feed;
mod resolver;
mod source;

pub use error::PollerError;
pub use feed::{parse_rss, FeedEntry, FeedSource, HttpFeedSource};
pub use resolver::{ItemResolver, TitleResolver};
pub use source::SourcePoller;
