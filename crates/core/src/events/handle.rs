use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::PipelineEvent;
use crate::metrics;

/// A pipeline event stamped with the time it was emitted.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event: PipelineEvent,
}

impl EventEnvelope {
    fn now(event: PipelineEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Sending side of the event log.
///
/// Clones share one bounded channel into the [`EventWriter`](super::EventWriter).
/// Emitting never fails the caller; lost events are counted in
/// `encodarr_events_dropped_total`.
#[derive(Clone)]
pub struct EventHandle {
    tx: mpsc::Sender<EventEnvelope>,
}

impl EventHandle {
    pub fn new(tx: mpsc::Sender<EventEnvelope>) -> Self {
        Self { tx }
    }

    /// Emit an event, waiting for room in the channel.
    pub async fn emit(&self, event: PipelineEvent) {
        if self.tx.send(EventEnvelope::now(event)).await.is_err() {
            metrics::EVENTS_DROPPED.inc();
            tracing::warn!("Event writer is gone, event dropped");
        }
    }

    /// Emit without waiting. Used for high-rate events such as encode
    /// progress, where losing a sample is fine.
    pub fn try_emit(&self, event: PipelineEvent) -> bool {
        match self.tx.try_send(EventEnvelope::now(event)) {
            Ok(()) => true,
            Err(TrySendError::Full(envelope)) => {
                metrics::EVENTS_DROPPED.inc();
                tracing::trace!(event = envelope.event.event_type(), "Event channel full");
                false
            }
            Err(TrySendError::Closed(_)) => {
                metrics::EVENTS_DROPPED.inc();
                false
            }
        }
    }
}
