use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{oneshot, OwnedSemaphorePermit};
use tracing::debug;

use super::queue::Shared;
use super::AdmissionError;
use crate::metrics;

/// Arrival-ordered ticket identifier.
pub type TicketId = u64;

/// An item's place in line for the encode stage.
///
/// Dropping a ticket before it is granted takes the item out of line.
pub struct Ticket {
    id: TicketId,
    item_id: String,
    grant: Option<oneshot::Receiver<OwnedSemaphorePermit>>,
    shared: Arc<Shared>,
    granted: bool,
}

impl Ticket {
    pub(super) fn new(
        id: TicketId,
        item_id: String,
        grant: oneshot::Receiver<OwnedSemaphorePermit>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            id,
            item_id,
            grant: Some(grant),
            shared,
            granted: false,
        }
    }

    /// Arrival order; lower ids were enqueued first.
    pub fn id(&self) -> TicketId {
        self.id
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    /// Suspend until granted. The returned guard is sole custody of the stage.
    pub async fn wait(mut self) -> Result<AdmissionGuard, AdmissionError> {
        let grant = self.grant.take().ok_or(AdmissionError::Closed)?;
        let permit = grant.await.map_err(|_| AdmissionError::Closed)?;
        self.granted = true;
        Ok(AdmissionGuard::new(
            Arc::clone(&self.shared),
            self.item_id.clone(),
            permit,
        ))
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.shared.abandon(self.id, &self.item_id, self.granted);
    }
}

/// Sole custody of the encode stage.
///
/// Release happens when the guard is dropped, on every exit path including
/// errors and panics.
pub struct AdmissionGuard {
    shared: Arc<Shared>,
    item_id: String,
    acquired_at: Instant,
    // Dropped after `Drop::drop` runs, so bookkeeping is cleared before the
    // next ticket can be granted.
    _permit: OwnedSemaphorePermit,
}

impl AdmissionGuard {
    fn new(shared: Arc<Shared>, item_id: String, permit: OwnedSemaphorePermit) -> Self {
        let previous = shared.holders.fetch_add(1, Ordering::SeqCst);
        if previous != 0 {
            panic!(
                "admission protocol violated: {} entered the encode stage while it was held",
                item_id
            );
        }
        shared.state().holder = Some(item_id.clone());
        metrics::ENCODE_STAGE_OCCUPIED.set(1);

        Self {
            shared,
            item_id,
            acquired_at: Instant::now(),
            _permit: permit,
        }
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    /// Explicitly give up the stage.
    pub fn release(self) {
        drop(self);
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("id", &self.id)
            .field("item_id", &self.item_id)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for AdmissionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionGuard")
            .field("item_id", &self.item_id)
            .finish_non_exhaustive()
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        let previous = self.shared.holders.fetch_sub(1, Ordering::SeqCst);
        if previous != 1 && !std::thread::panicking() {
            panic!(
                "admission protocol violated: {} released the encode stage with {} holders",
                self.item_id, previous
            );
        }
        self.shared.finish(&self.item_id);
        metrics::ENCODE_STAGE_OCCUPIED.set(0);
        debug!(
            item = %self.item_id,
            held_secs = self.acquired_at.elapsed().as_secs(),
            "Released encode stage"
        );
    }
}
