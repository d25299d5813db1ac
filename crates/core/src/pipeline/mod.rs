//! End-to-end processing of one item.
//!
//! The [`Coordinator`] drives an item through dedupe, fetch, admission,
//! encode, publish and ledger update, and always gives the encode stage
//! back, whatever happens in between.

mod coordinator;
mod types;

pub use coordinator::Coordinator;
pub use types::*;
