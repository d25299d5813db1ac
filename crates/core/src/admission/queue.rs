use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{broadcast, oneshot, Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use super::ticket::{Ticket, TicketId};
use super::{AdmissionError, AdmissionGuard};
use crate::metrics;

/// A ticket still in line.
struct Waiting {
    item_id: String,
    enqueued_at: Instant,
    grant: oneshot::Sender<OwnedSemaphorePermit>,
}

#[derive(Default)]
pub(super) struct QueueState {
    next_id: TicketId,
    line: VecDeque<TicketId>,
    /// Tickets not yet granted, removed as soon as they fire.
    waiting: HashMap<TicketId, Waiting>,
    /// Items that are either in line or holding the stage.
    outstanding: HashSet<String>,
    pub(super) holder: Option<String>,
    closed: bool,
}

impl QueueState {
    fn publish_depth(&self) {
        metrics::ADMISSION_QUEUE_DEPTH.set(self.line.len() as i64);
    }
}

pub(super) struct Shared {
    state: Mutex<QueueState>,
    gate: Arc<Semaphore>,
    notify: Notify,
    pub(super) holders: AtomicUsize,
}

impl Shared {
    pub(super) fn state(&self) -> MutexGuard<'_, QueueState> {
        // Critical sections never panic midway, so a poisoned lock still holds
        // consistent state.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Forget a ticket that will never reach (or never used) its grant.
    pub(super) fn abandon(&self, id: TicketId, item_id: &str, granted: bool) {
        let mut state = self.state();
        if state.waiting.remove(&id).is_some() {
            state.line.retain(|t| *t != id);
            state.publish_depth();
            debug!(ticket = id, item = item_id, "Abandoned admission ticket");
        }
        if !granted {
            state.outstanding.remove(item_id);
        }
    }

    pub(super) fn finish(&self, item_id: &str) {
        let mut state = self.state();
        state.holder = None;
        state.outstanding.remove(item_id);
    }
}

/// Snapshot of the queue for status reporting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AdmissionStatus {
    /// Items in line, head first.
    pub queued: Vec<String>,
    /// Item currently inside the encode stage.
    pub holder: Option<String>,
    pub closed: bool,
}

/// FIFO admission into the single-slot encode stage.
pub struct AdmissionQueue {
    shared: Arc<Shared>,
}

impl Default for AdmissionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionQueue {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                gate: Arc::new(Semaphore::new(1)),
                notify: Notify::new(),
                holders: AtomicUsize::new(0),
            }),
        }
    }

    /// Put an item at the back of the line.
    ///
    /// Returns immediately. An item can only be in line once at a time.
    pub fn enqueue(&self, item_id: impl Into<String>) -> Result<Ticket, AdmissionError> {
        let item_id = item_id.into();
        let mut state = self.shared.state();

        if state.closed {
            return Err(AdmissionError::Closed);
        }
        if !state.outstanding.insert(item_id.clone()) {
            return Err(AdmissionError::DuplicateItem(item_id));
        }

        let id = state.next_id;
        state.next_id += 1;

        let (tx, rx) = oneshot::channel();
        state.waiting.insert(
            id,
            Waiting {
                item_id: item_id.clone(),
                enqueued_at: Instant::now(),
                grant: tx,
            },
        );
        state.line.push_back(id);
        state.publish_depth();
        drop(state);

        debug!(ticket = id, item = %item_id, "Enqueued for encoding");
        self.shared.notify.notify_one();

        Ok(Ticket::new(id, item_id, rx, Arc::clone(&self.shared)))
    }

    /// Suspend until the ticket is granted and the caller holds the stage.
    pub async fn wait(&self, ticket: Ticket) -> Result<AdmissionGuard, AdmissionError> {
        ticket.wait().await
    }

    /// Give up the encode stage so the next ticket can be granted.
    ///
    /// Dropping the guard does the same.
    pub fn release(&self, guard: AdmissionGuard) {
        guard.release();
    }

    /// Background loop granting the stage in arrival order.
    ///
    /// Runs until shutdown is signalled or the queue is closed. Shutdown
    /// closes the queue, so no ticket is granted after it.
    pub async fn admit(&self, mut shutdown: broadcast::Receiver<()>) {
        info!("Admission loop started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    self.close();
                    break;
                }
                running = self.grant_next() => {
                    if !running {
                        break;
                    }
                }
            }
        }
        info!("Admission loop stopped");
    }

    /// Grant the head of the line. Returns false once the queue is closed.
    async fn grant_next(&self) -> bool {
        loop {
            let notified = self.shared.notify.notified();
            {
                let state = self.shared.state();
                if state.closed {
                    return false;
                }
                if !state.line.is_empty() {
                    break;
                }
            }
            notified.await;
        }

        // Waits for the previous holder to release.
        let permit = match Arc::clone(&self.shared.gate).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return false,
        };

        let next = {
            let mut state = self.shared.state();
            if state.closed {
                return false;
            }
            let next = state
                .line
                .pop_front()
                .and_then(|id| state.waiting.remove(&id).map(|w| (id, w)));
            state.publish_depth();
            next
        };

        // The head may have been abandoned while we waited for the gate.
        let Some((id, waiting)) = next else {
            return true;
        };

        let waited = waiting.enqueued_at.elapsed();
        match waiting.grant.send(permit) {
            Ok(()) => {
                metrics::ADMISSION_WAIT
                    .with_label_values(&[])
                    .observe(waited.as_secs_f64());
                info!(
                    ticket = id,
                    item = %waiting.item_id,
                    waited_secs = waited.as_secs(),
                    "Granted encode stage"
                );
            }
            Err(_permit) => {
                debug!(ticket = id, item = %waiting.item_id, "Ticket dropped before grant");
            }
        }
        true
    }

    /// Stop granting. Tickets still in line fail with [`AdmissionError::Closed`];
    /// a current holder keeps the stage until it releases.
    pub fn close(&self) {
        let mut state = self.shared.state();
        if state.closed {
            return;
        }
        state.closed = true;
        state.line.clear();
        let dropped = state.waiting.len();
        state.waiting.clear();
        state.publish_depth();
        drop(state);

        self.shared.gate.close();
        self.shared.notify.notify_one();
        info!(dropped, "Admission queue closed");
    }

    pub fn status(&self) -> AdmissionStatus {
        let state = self.shared.state();
        AdmissionStatus {
            queued: state
                .line
                .iter()
                .filter_map(|id| state.waiting.get(id).map(|w| w.item_id.clone()))
                .collect(),
            holder: state.holder.clone(),
            closed: state.closed,
        }
    }

    /// Number of tickets in line.
    pub fn len(&self) -> usize {
        self.shared.state().line.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn start(queue: &Arc<AdmissionQueue>) -> broadcast::Sender<()> {
        let (tx, rx) = broadcast::channel(1);
        let q = Arc::clone(queue);
        tokio::spawn(async move { q.admit(rx).await });
        tx
    }

    #[tokio::test]
    async fn test_single_ticket_granted() {
        let queue = Arc::new(AdmissionQueue::new());
        let _stop = start(&queue);

        let ticket = queue.enqueue("a").unwrap();
        let guard = timeout(Duration::from_secs(1), queue.wait(ticket))
            .await
            .expect("grant timed out")
            .unwrap();
        assert_eq!(guard.item_id(), "a");
        assert_eq!(queue.status().holder.as_deref(), Some("a"));

        queue.release(guard);
        assert!(queue.status().holder.is_none());
    }

    #[tokio::test]
    async fn test_second_ticket_waits_for_release() {
        let queue = Arc::new(AdmissionQueue::new());
        let _stop = start(&queue);

        let first = queue.enqueue("a").unwrap();
        let second = queue.enqueue("b").unwrap();

        let guard_a = queue.wait(first).await.unwrap();

        let q = Arc::clone(&queue);
        let waiter = tokio::spawn(async move { q.wait(second).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard_a);
        let guard_b = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("second grant timed out")
            .unwrap()
            .unwrap();
        assert_eq!(guard_b.item_id(), "b");
    }

    #[tokio::test]
    async fn test_duplicate_item_rejected_until_released() {
        let queue = Arc::new(AdmissionQueue::new());
        let _stop = start(&queue);

        let ticket = queue.enqueue("a").unwrap();
        assert_eq!(
            queue.enqueue("a").unwrap_err(),
            AdmissionError::DuplicateItem("a".to_string())
        );

        let guard = queue.wait(ticket).await.unwrap();
        assert!(queue.enqueue("a").is_err());
        drop(guard);

        assert!(queue.enqueue("a").is_ok());
    }

    #[tokio::test]
    async fn test_abandoned_ticket_is_skipped() {
        let queue = Arc::new(AdmissionQueue::new());
        let _stop = start(&queue);

        let holder = queue.wait(queue.enqueue("a").unwrap()).await.unwrap();
        let abandoned = queue.enqueue("b").unwrap();
        let third = queue.enqueue("c").unwrap();
        assert_eq!(queue.len(), 2);

        drop(abandoned);
        assert_eq!(queue.status().queued, vec!["c".to_string()]);
        drop(holder);

        let guard = timeout(Duration::from_secs(1), queue.wait(third))
            .await
            .expect("grant timed out")
            .unwrap();
        assert_eq!(guard.item_id(), "c");
        // The abandoned item can line up again.
        assert!(queue.enqueue("b").is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_wait_does_not_block_queue() {
        let queue = Arc::new(AdmissionQueue::new());
        let _stop = start(&queue);

        let holder = queue.wait(queue.enqueue("a").unwrap()).await.unwrap();
        let cancelled = queue.enqueue("b").unwrap();
        let next = queue.enqueue("c").unwrap();

        // The waiter gives up while still in line.
        let result = timeout(Duration::from_millis(20), queue.wait(cancelled)).await;
        assert!(result.is_err());

        drop(holder);
        let guard = timeout(Duration::from_secs(1), queue.wait(next))
            .await
            .expect("grant timed out")
            .unwrap();
        assert_eq!(guard.item_id(), "c");
    }

    #[tokio::test]
    async fn test_shutdown_fails_waiters() {
        let queue = Arc::new(AdmissionQueue::new());
        let stop = start(&queue);

        let holder = queue.wait(queue.enqueue("a").unwrap()).await.unwrap();
        let waiting = queue.enqueue("b").unwrap();

        stop.send(()).unwrap();
        let result = timeout(Duration::from_secs(1), queue.wait(waiting))
            .await
            .expect("waiter not woken");
        assert_eq!(result.unwrap_err(), AdmissionError::Closed);
        assert!(matches!(queue.enqueue("c"), Err(AdmissionError::Closed)));
        assert!(queue.status().closed);

        // The holder still owns the stage until it lets go.
        assert_eq!(queue.status().holder.as_deref(), Some("a"));
        drop(holder);
        assert!(queue.status().holder.is_none());
    }

    #[tokio::test]
    async fn test_status_lists_line_in_order() {
        let queue = AdmissionQueue::new();
        let _a = queue.enqueue("a").unwrap();
        let _b = queue.enqueue("b").unwrap();
        let _c = queue.enqueue("c").unwrap();

        let status = queue.status();
        assert_eq!(status.queued, vec!["a", "b", "c"]);
        assert!(status.holder.is_none());
        assert!(!status.closed);
    }

    #[tokio::test]
    async fn test_panicking_holder_releases_stage() {
        let queue = Arc::new(AdmissionQueue::new());
        let _stop = start(&queue);

        let first = queue.enqueue("a").unwrap();
        let second = queue.enqueue("b").unwrap();

        let q = Arc::clone(&queue);
        let crashed = tokio::spawn(async move {
            let _guard = q.wait(first).await.unwrap();
            panic!("encode blew up");
        });
        assert!(crashed.await.is_err());

        let guard = timeout(Duration::from_secs(1), queue.wait(second))
            .await
            .expect("queue deadlocked after a panicking holder")
            .unwrap();
        assert_eq!(guard.item_id(), "b");
    }
}
