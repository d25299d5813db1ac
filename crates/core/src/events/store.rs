use chrono::{DateTime, Utc};
use thiserror::Error;

use super::EventRecord;

/// Page size when a filter does not set one.
pub const DEFAULT_PAGE_SIZE: i64 = 100;

#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Event payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Invalid stored timestamp '{0}'")]
    Timestamp(String),

    #[error("Event store lock poisoned")]
    Poisoned,
}

/// Which stored events to return.
///
/// Every criterion is optional; an empty filter matches the whole log.
/// Paging only applies to [`EventStore::query`].
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// `series#episode` of the item the event belongs to.
    pub item_id: Option<String>,
    /// Serialized event tag, e.g. `encode_failed`.
    pub event_type: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: i64,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_item(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    pub fn of_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn between(mut self, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    pub fn page(mut self, limit: i64, offset: i64) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }

    pub fn page_size(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE)
    }
}

/// Durable pipeline event log.
pub trait EventStore: Send + Sync {
    /// Append a record, returning its row id.
    fn insert(&self, record: &EventRecord) -> Result<i64, EventStoreError>;

    /// One page of matching records, newest first.
    fn query(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, EventStoreError>;

    /// Matching records, ignoring paging.
    fn count(&self, filter: &EventFilter) -> Result<i64, EventStoreError>;
}
