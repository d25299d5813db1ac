//! Embedded torrent client.
//!
//! The `TorrentClient` trait keeps the transport testable without a real
//! session; `LibrqbitClient` is the production backend.

mod librqbit;
mod types;

pub use self::librqbit::LibrqbitClient;
pub use types::*;
