//! Completion ledger.
//!
//! Durable per-(item, variant) completion flags. Retrying an item only
//! repeats the variants the ledger does not yet record as done.

mod sqlite;
mod store;
mod types;

pub use sqlite::SqliteLedger;
pub use store::{CompletionLedger, LedgerError};
pub use types::{ItemKey, ItemStatus};
