use std::sync::Arc;

use chrono::{DateTime, Utc};
use encodarr_core::events::EventStore;
use encodarr_core::{Config, Coordinator, ProcessRegistry, SourcePoller};

/// Shared application state
pub struct AppState {
    config: Config,
    coordinator: Arc<Coordinator>,
    registry: Arc<ProcessRegistry>,
    event_store: Arc<dyn EventStore>,
    poller: Option<Arc<SourcePoller>>,
    started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        config: Config,
        coordinator: Arc<Coordinator>,
        registry: Arc<ProcessRegistry>,
        event_store: Arc<dyn EventStore>,
        poller: Option<Arc<SourcePoller>>,
    ) -> Self {
        Self {
            config,
            coordinator,
            registry,
            event_store,
            poller,
            started_at: Utc::now(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn registry(&self) -> &ProcessRegistry {
        self.registry.as_ref()
    }

    pub fn event_store(&self) -> &dyn EventStore {
        self.event_store.as_ref()
    }

    pub fn poller(&self) -> Option<&Arc<SourcePoller>> {
        self.poller.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}
