//! Ledger storage trait.

use thiserror::Error;

use super::{ItemKey, ItemStatus};

/// Errors returned by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(String),
}

/// Durable record of which variants of which items are done.
///
/// Implementations must make `mark_variant_done` atomic: concurrent calls
/// for different variants of one item must not lose each other's flags.
pub trait CompletionLedger: Send + Sync {
    /// Current status of an item. Unknown items return an empty status.
    fn get_status(&self, key: &ItemKey) -> Result<ItemStatus, LedgerError>;

    /// Upsert one variant's flag, and the item's reference when given.
    ///
    /// Other variants of the item are left untouched. Calling this twice
    /// with the same arguments is the same as calling it once.
    fn mark_variant_done(
        &self,
        key: &ItemKey,
        variant: &str,
        external_ref: Option<&str>,
    ) -> Result<(), LedgerError>;

    /// Remove every record. Maintenance and tests only.
    fn drop_all(&self) -> Result<(), LedgerError>;
}
