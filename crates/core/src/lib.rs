pub mod admission;
pub mod config;
pub mod events;
pub mod ledger;
pub mod metrics;
pub mod pipeline;
pub mod poller;
pub mod publisher;
pub mod retry;
pub mod supervisor;
pub mod testing;
pub mod torrent;
pub mod transport;

pub use admission::{AdmissionError, AdmissionGuard, AdmissionQueue, AdmissionStatus, Ticket};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, EncodeProfile,
};
pub use events::{create_event_system, EventHandle, EventWriter, PipelineEvent};
pub use ledger::{CompletionLedger, ItemKey, ItemStatus, LedgerError, SqliteLedger};
pub use pipeline::{Coordinator, Item, Outcome, PipelineStage, ProcessMode, SkipReason};
pub use poller::{HttpFeedSource, SourcePoller, TitleResolver};
pub use publisher::{DirectoryPublisher, PublishError, Publisher};
pub use retry::{retry_with_backoff, RetryConfig, Retryable};
pub use supervisor::{EncodeExit, Encoder, ProcessRegistry, ProcessSupervisor, SupervisorError};
pub use transport::{Download, TorrentTransport, Transport, TransportError};
