//! Admission queue for the encode stage.
//!
//! Any number of items may download or publish at once, but only one may
//! encode. Items line up in arrival order; a background loop grants the
//! stage to the head of the line once the previous holder has released it.
//!
//! A grant is a one-shot wake-up carrying the exclusion permit itself, so
//! "my turn has arrived" and "I hold the stage" happen in one hand-off and
//! no other waiter can slip in between.

mod queue;
mod ticket;

pub use queue::{AdmissionQueue, AdmissionStatus};
pub use ticket::{AdmissionGuard, Ticket, TicketId};

use thiserror::Error;

/// Errors returned by the admission queue.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    /// The item already holds a place in line or the stage.
    #[error("Item {0} is already queued for encoding")]
    DuplicateItem(String),

    /// The queue shut down before the ticket was granted.
    #[error("Admission queue is closed")]
    Closed,
}
