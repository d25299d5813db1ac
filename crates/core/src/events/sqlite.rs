use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{EventFilter, EventRecord, EventStore, EventStoreError, PipelineEvent};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS pipeline_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        event_type TEXT NOT NULL,
        item_id TEXT,
        data TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_pipeline_events_timestamp ON pipeline_events(timestamp);
    CREATE INDEX IF NOT EXISTS idx_pipeline_events_item_id ON pipeline_events(item_id);
    CREATE INDEX IF NOT EXISTS idx_pipeline_events_event_type ON pipeline_events(event_type);
"#;

/// SQLite-backed event store
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

impl SqliteEventStore {
    /// Open the database file, creating tables if needed
    pub fn new(path: &Path) -> Result<Self, EventStoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory store for tests
    pub fn in_memory() -> Result<Self, EventStoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, EventStoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, EventStoreError> {
        self.conn.lock().map_err(|_| EventStoreError::Poisoned)
    }

    fn build_where_clause(filter: &EventFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref item_id) = filter.item_id {
            conditions.push("item_id = ?");
            params.push(Box::new(item_id.clone()));
        }

        if let Some(ref event_type) = filter.event_type {
            conditions.push("event_type = ?");
            params.push(Box::new(event_type.clone()));
        }

        if let Some(ref since) = filter.since {
            conditions.push("timestamp >= ?");
            params.push(Box::new(since.to_rfc3339()));
        }

        if let Some(ref until) = filter.until {
            conditions.push("timestamp <= ?");
            params.push(Box::new(until.to_rfc3339()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }
}

impl EventStore for SqliteEventStore {
    fn insert(&self, record: &EventRecord) -> Result<i64, EventStoreError> {
        let data_json = serde_json::to_string(&record.data)?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO pipeline_events (timestamp, event_type, item_id, data) VALUES (?, ?, ?, ?)",
            params![
                record.timestamp.to_rfc3339(),
                record.event_type,
                record.item_id,
                data_json,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn query(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, EventStoreError> {
        let conn = self.conn()?;

        let (where_clause, mut params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT id, timestamp, event_type, item_id, data FROM pipeline_events {} \
             ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
            where_clause
        );

        let mut stmt = conn.prepare(&sql)?;

        params.push(Box::new(filter.page_size()));
        params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, timestamp, event_type, item_id, data_json) = row?;

            let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&timestamp)
                .map_err(|_| EventStoreError::Timestamp(timestamp.clone()))?
                .into();
            let data: PipelineEvent = serde_json::from_str(&data_json)?;

            records.push(EventRecord {
                id,
                timestamp,
                event_type,
                item_id,
                data,
            });
        }

        Ok(records)
    }

    fn count(&self, filter: &EventFilter) -> Result<i64, EventStoreError> {
        let conn = self.conn()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM pipeline_events {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        Ok(conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?)
    }
}
