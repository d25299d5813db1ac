//! SQLite-backed completion ledger.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::{CompletionLedger, ItemKey, ItemStatus, LedgerError};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS ledger_items (
        series_id TEXT NOT NULL,
        episode_no TEXT NOT NULL,
        external_ref TEXT,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (series_id, episode_no)
    );

    CREATE TABLE IF NOT EXISTS ledger_variants (
        series_id TEXT NOT NULL,
        episode_no TEXT NOT NULL,
        variant TEXT NOT NULL,
        done INTEGER NOT NULL DEFAULT 0,
        external_ref TEXT,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (series_id, episode_no, variant)
    );
"#;

/// SQLite completion ledger.
pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    /// Open (or create) the ledger at `path`.
    pub fn new(path: &Path) -> Result<Self, LedgerError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::from_connection(conn)
    }

    /// In-memory ledger for tests.
    pub fn in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn
            .lock()
            .map_err(|_| LedgerError::Database("ledger connection lock poisoned".to_string()))
    }
}

fn db_err(e: rusqlite::Error) -> LedgerError {
    LedgerError::Database(e.to_string())
}

impl CompletionLedger for SqliteLedger {
    fn get_status(&self, key: &ItemKey) -> Result<ItemStatus, LedgerError> {
        let conn = self.conn()?;

        let external_ref: Option<String> = conn
            .query_row(
                "SELECT external_ref FROM ledger_items WHERE series_id = ?1 AND episode_no = ?2",
                params![key.series_id, key.episode_no],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?
            .flatten();

        let mut stmt = conn
            .prepare(
                "SELECT variant, done, external_ref FROM ledger_variants
                 WHERE series_id = ?1 AND episode_no = ?2",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![key.series_id, key.episode_no], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .map_err(db_err)?;

        let mut status = ItemStatus {
            external_ref,
            ..ItemStatus::default()
        };
        for row in rows {
            let (variant, done, variant_ref) = row.map_err(db_err)?;
            if let Some(r) = variant_ref {
                status.variant_refs.insert(variant.clone(), r);
            }
            status.variants.insert(variant, done);
        }

        Ok(status)
    }

    fn mark_variant_done(
        &self,
        key: &ItemKey,
        variant: &str,
        external_ref: Option<&str>,
    ) -> Result<(), LedgerError> {
        let mut conn = self.conn()?;
        let now = Utc::now().to_rfc3339();

        let tx = conn.transaction().map_err(db_err)?;

        tx.execute(
            "INSERT INTO ledger_items (series_id, episode_no, external_ref, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (series_id, episode_no) DO UPDATE SET
                external_ref = COALESCE(excluded.external_ref, ledger_items.external_ref),
                updated_at = excluded.updated_at",
            params![key.series_id, key.episode_no, external_ref, now],
        )
        .map_err(db_err)?;

        tx.execute(
            "INSERT INTO ledger_variants (series_id, episode_no, variant, done, external_ref, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?5)
             ON CONFLICT (series_id, episode_no, variant) DO UPDATE SET
                done = 1,
                external_ref = COALESCE(excluded.external_ref, ledger_variants.external_ref),
                updated_at = excluded.updated_at",
            params![key.series_id, key.episode_no, variant, external_ref, now],
        )
        .map_err(db_err)?;

        tx.commit().map_err(db_err)?;
        Ok(())
    }

    fn drop_all(&self) -> Result<(), LedgerError> {
        let conn = self.conn()?;
        conn.execute_batch("DELETE FROM ledger_variants; DELETE FROM ledger_items;")
            .map_err(db_err)?;
        Ok(())
    }
}
