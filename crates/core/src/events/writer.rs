use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{EventEnvelope, EventHandle, EventRecord, EventStore, PipelineEvent};

/// Background task that receives pipeline events, logs them and writes
/// them to storage
pub struct EventWriter {
    rx: mpsc::Receiver<EventEnvelope>,
    store: Arc<dyn EventStore>,
}

impl EventWriter {
    pub fn new(rx: mpsc::Receiver<EventEnvelope>, store: Arc<dyn EventStore>) -> Self {
        Self { rx, store }
    }

    /// Consume events until every [`EventHandle`] has been dropped.
    pub async fn run(mut self) {
        info!("Event writer started");

        while let Some(envelope) = self.rx.recv().await {
            log_event(&envelope.event);

            if !envelope.event.is_persistent() {
                continue;
            }

            let record = EventRecord {
                id: 0,
                timestamp: envelope.timestamp,
                event_type: envelope.event.event_type().to_string(),
                item_id: envelope.event.item_id().map(String::from),
                data: envelope.event,
            };

            let store = Arc::clone(&self.store);
            let result = tokio::task::spawn_blocking(move || store.insert(&record)).await;
            match result {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::error!("Failed to write pipeline event: {}", e),
                Err(e) => tracing::error!("Event insert task failed: {}", e),
            }
        }

        info!("Event writer shutting down");
    }
}

fn log_event(event: &PipelineEvent) {
    let item = event.item_id().unwrap_or("-");
    match event {
        PipelineEvent::EncodeProgress {
            variant,
            percent,
            eta_secs,
            ..
        } => debug!(item, variant = %variant, percent, eta_secs, "encode_progress"),
        PipelineEvent::DownloadFailed { error, .. } => {
            warn!(item, error = %error, "download_failed")
        }
        PipelineEvent::EncodeFailed { variant, error, .. }
        | PipelineEvent::PublishFailed { variant, error, .. } => {
            warn!(item, variant = %variant, error = %error, "{}", event.event_type())
        }
        PipelineEvent::OrphansKilled { pids } => warn!(?pids, "orphans_killed"),
        other => info!(item, "{}", other.event_type()),
    }
}

/// Create a complete event system
///
/// Returns the handle to clone into components and the writer to spawn
/// with `tokio::spawn(writer.run())`.
pub fn create_event_system(
    store: Arc<dyn EventStore>,
    buffer_size: usize,
) -> (EventHandle, EventWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let handle = EventHandle::new(tx);
    let writer = EventWriter::new(rx, store);
    (handle, writer)
}
