//! The polling loop.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{FeedSource, ItemResolver};
use crate::config::PollerConfig;
use crate::events::{EventHandle, PipelineEvent};
use crate::metrics;
use crate::pipeline::{Coordinator, Outcome, ProcessMode, SkipReason};

/// Locators remembered per configured feed.
const REMEMBERED_PER_FEED: usize = 256;

/// Recently dispatched locators, oldest evicted first.
///
/// Each insert gets a generation so that a stale queue slot never evicts a
/// locator that was forgotten and dispatched again.
#[derive(Debug)]
struct Dispatched {
    capacity: usize,
    next_gen: u64,
    live: HashMap<String, u64>,
    order: VecDeque<(String, u64)>,
}

impl Dispatched {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_gen: 0,
            live: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Remember `locator`. Returns its generation, or `None` if it is
    /// already remembered.
    fn insert(&mut self, locator: &str) -> Option<u64> {
        if self.live.contains_key(locator) {
            return None;
        }
        let generation = self.next_gen;
        self.next_gen += 1;
        self.live.insert(locator.to_string(), generation);
        self.order.push_back((locator.to_string(), generation));

        while self.order.len() > self.capacity {
            if let Some((old, old_gen)) = self.order.pop_front() {
                if self.live.get(&old) == Some(&old_gen) {
                    self.live.remove(&old);
                }
            }
        }
        Some(generation)
    }

    /// Forget `locator` if it still carries `generation`.
    fn forget(&mut self, locator: &str, generation: u64) {
        if self.live.get(locator) == Some(&generation) {
            self.live.remove(locator);
        }
    }

    fn len(&self) -> usize {
        self.live.len()
    }
}

fn lock_dispatched(dispatched: &Mutex<Dispatched>) -> MutexGuard<'_, Dispatched> {
    dispatched.lock().unwrap_or_else(|e| e.into_inner())
}

/// Periodically reads the configured feeds and hands new items to the
/// coordinator.
///
/// Each dispatched locator is remembered. A locator whose item ends up
/// completed, already complete or skipped as a batch is not dispatched
/// again; any other outcome makes it eligible on the next poll. Memory is
/// bounded to the most recent locators per feed; an evicted locator that
/// reappears is deduped by the ledger instead.
pub struct SourcePoller {
    config: PollerConfig,
    source: Arc<dyn FeedSource>,
    resolver: Arc<dyn ItemResolver>,
    coordinator: Arc<Coordinator>,
    events: Option<EventHandle>,
    enabled: AtomicBool,
    dispatched: Arc<Mutex<Dispatched>>,
}

impl SourcePoller {
    pub fn new(
        config: PollerConfig,
        source: Arc<dyn FeedSource>,
        resolver: Arc<dyn ItemResolver>,
        coordinator: Arc<Coordinator>,
    ) -> Self {
        let enabled = AtomicBool::new(config.enabled);
        let capacity = config.feeds.len().max(1) * REMEMBERED_PER_FEED;
        Self {
            config,
            source,
            resolver,
            coordinator,
            events: None,
            enabled,
            dispatched: Arc::new(Mutex::new(Dispatched::new(capacity))),
        }
    }

    pub fn with_events(mut self, events: EventHandle) -> Self {
        self.events = Some(events);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Pause or resume polling without stopping the loop.
    pub fn set_enabled(&self, enabled: bool) {
        if self.enabled.swap(enabled, Ordering::Relaxed) != enabled {
            info!(enabled, "Source polling toggled");
        }
    }

    /// Number of locators currently remembered.
    pub fn remembered(&self) -> usize {
        lock_dispatched(&self.dispatched).len()
    }

    /// Run until shutdown, polling every `interval_secs`.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let interval = Duration::from_secs(self.config.interval_secs);
        info!(
            feeds = self.config.feeds.len(),
            interval_secs = self.config.interval_secs,
            source = self.source.name(),
            "Source poller started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Source poller received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    if !self.is_enabled() {
                        debug!("Source polling disabled, skipping");
                        continue;
                    }
                    let spawned = self.poll_once().await;
                    if !spawned.is_empty() {
                        debug!(count = spawned.len(), "Dispatched items");
                    }
                }
            }
        }
        info!("Source poller stopped");
    }

    /// Read every feed once and dispatch new items.
    ///
    /// Returns the handles of the spawned processing tasks.
    pub async fn poll_once(&self) -> Vec<JoinHandle<Outcome>> {
        let mut spawned = Vec::new();

        for feed in &self.config.feeds {
            let entries = match self.source.fetch(feed).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(feed = %feed, error = %e, "Failed to fetch feed");
                    continue;
                }
            };

            for entry in entries.into_iter().take(self.config.max_entries) {
                let Some(item) = self.resolver.resolve(&entry) else {
                    debug!(title = %entry.title, "Could not resolve feed entry");
                    continue;
                };
                let inserted = lock_dispatched(&self.dispatched).insert(&item.locator);
                let Some(generation) = inserted else {
                    continue;
                };

                let item_id = item.key.to_string();
                info!(item = %item_id, title = %item.title, "Discovered item");
                metrics::ITEMS_DISCOVERED.inc();
                if let Some(events) = &self.events {
                    events
                        .emit(PipelineEvent::ItemDiscovered {
                            item_id,
                            title: item.title.clone(),
                            locator: item.locator.clone(),
                        })
                        .await;
                }

                let coordinator = Arc::clone(&self.coordinator);
                let dispatched = Arc::clone(&self.dispatched);
                spawned.push(self.coordinator.spawn_tracked(async move {
                    let locator = item.locator.clone();
                    let outcome = coordinator.process(item, ProcessMode::Normal).await;
                    if !is_settled(&outcome) {
                        lock_dispatched(&dispatched).forget(&locator, generation);
                    }
                    outcome
                }));
            }
        }

        spawned
    }
}

/// Outcomes that make further attempts pointless.
fn is_settled(outcome: &Outcome) -> bool {
    matches!(
        outcome,
        Outcome::Completed { .. }
            | Outcome::Skipped {
                reason: SkipReason::AlreadyComplete | SkipReason::Batch
            }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionQueue;
    use crate::config::PipelineConfig;
    use crate::ledger::{CompletionLedger, ItemKey, SqliteLedger};
    use crate::poller::{FeedEntry, TitleResolver};
    use crate::testing::{MockEncoder, MockFeedSource, MockPublisher, MockTransport};

    const FEED: &str = "https://feeds.example.org/rss";

    struct Harness {
        poller: Arc<SourcePoller>,
        feed: Arc<MockFeedSource>,
        transport: Arc<MockTransport>,
        ledger: Arc<SqliteLedger>,
        shutdown: broadcast::Sender<()>,
        _dir: tempfile::TempDir,
    }

    fn harness(config: PollerConfig) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(SqliteLedger::in_memory().unwrap());
        let queue = Arc::new(AdmissionQueue::new());
        let transport = Arc::new(MockTransport::new(dir.path().join("dl")));
        let (shutdown, _) = broadcast::channel(1);
        {
            let queue = Arc::clone(&queue);
            let rx = shutdown.subscribe();
            tokio::spawn(async move { queue.admit(rx).await });
        }

        let coordinator = Arc::new(Coordinator::new(
            PipelineConfig::default().with_variants(["480"]),
            dir.path().join("enc"),
            ledger.clone(),
            queue,
            Arc::new(MockEncoder::new()),
            transport.clone(),
            Arc::new(MockPublisher::new()),
        ));
        let feed = Arc::new(MockFeedSource::new());
        let poller = Arc::new(SourcePoller::new(
            config,
            feed.clone(),
            Arc::new(TitleResolver::new().unwrap()),
            coordinator,
        ));

        Harness {
            poller,
            feed,
            transport,
            ledger,
            shutdown,
            _dir: dir,
        }
    }

    fn config() -> PollerConfig {
        PollerConfig {
            feeds: vec![FEED.to_string()],
            ..PollerConfig::default()
        }
    }

    async fn join(handles: Vec<JoinHandle<Outcome>>) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }
        outcomes
    }

    #[tokio::test]
    async fn test_poll_dispatches_newest_entry() {
        let h = harness(config());
        h.feed
            .set_entries(
                FEED,
                vec![
                    FeedEntry::new("[Sub] Show - 02 [1080p]", "magnet:?xt=urn:btih:2"),
                    FeedEntry::new("[Sub] Show - 01 [1080p]", "magnet:?xt=urn:btih:1"),
                ],
            )
            .await;

        let outcomes = join(h.poller.poll_once().await).await;

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_completed());
        let status = h.ledger.get_status(&ItemKey::new("show", "2")).unwrap();
        assert!(status.is_done("480"));
        assert!(!h
            .ledger
            .get_status(&ItemKey::new("show", "1"))
            .unwrap()
            .is_done("480"));
    }

    #[tokio::test]
    async fn test_completed_locator_is_not_redispatched() {
        let h = harness(config());
        h.feed
            .set_entries(
                FEED,
                vec![FeedEntry::new("[Sub] Show - 03 [1080p]", "magnet:?xt=urn:btih:3")],
            )
            .await;

        assert_eq!(join(h.poller.poll_once().await).await.len(), 1);
        assert!(h.poller.poll_once().await.is_empty());
        assert_eq!(h.transport.download_count().await, 1);
    }

    #[tokio::test]
    async fn test_failed_item_is_retried_on_next_poll() {
        let h = harness(config());
        h.feed
            .set_entries(
                FEED,
                vec![FeedEntry::new("[Sub] Show - 04 [1080p]", "magnet:?xt=urn:btih:4")],
            )
            .await;
        h.transport.fail_next("tracker down").await;

        let first = join(h.poller.poll_once().await).await;
        assert!(matches!(first[0], Outcome::Failed { .. }));

        let second = join(h.poller.poll_once().await).await;
        assert!(second[0].is_completed());
    }

    #[tokio::test]
    async fn test_feed_errors_and_unresolvable_entries_are_skipped() {
        let mut cfg = config();
        cfg.feeds.push("https://broken.example.org/rss".to_string());
        cfg.max_entries = 5;
        let h = harness(cfg);
        h.feed.fail_feed("https://broken.example.org/rss").await;
        h.feed
            .set_entries(
                FEED,
                vec![
                    FeedEntry::new("Untitled Movie [1080p]", "magnet:?xt=urn:btih:m"),
                    FeedEntry::new("[Sub] Show - 05 [1080p]", "magnet:?xt=urn:btih:5"),
                ],
            )
            .await;

        let outcomes = join(h.poller.poll_once().await).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(h.feed.fetch_count().await, 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let mut cfg = config();
        cfg.interval_secs = 3600;
        let h = harness(cfg);
        let task = tokio::spawn(Arc::clone(&h.poller).run(h.shutdown.subscribe()));

        h.shutdown.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_dispatched_evicts_oldest_past_capacity() {
        let mut dispatched = Dispatched::new(2);
        assert!(dispatched.insert("a").is_some());
        assert!(dispatched.insert("a").is_none());
        assert!(dispatched.insert("b").is_some());
        assert!(dispatched.insert("c").is_some());

        assert_eq!(dispatched.len(), 2);
        assert!(dispatched.order.len() <= 2);
        // "a" was evicted, so it can be dispatched again
        assert!(dispatched.insert("a").is_some());
        assert!(dispatched.insert("c").is_none());
    }

    #[test]
    fn test_stale_slot_does_not_evict_redispatched_locator() {
        let mut dispatched = Dispatched::new(2);
        let first = dispatched.insert("a").unwrap();
        dispatched.forget("a", first);
        let second = dispatched.insert("a").unwrap();
        assert_ne!(first, second);

        // Pushes out the stale ("a", first) slot only.
        dispatched.insert("b").unwrap();
        assert!(dispatched.insert("a").is_none());

        // An old generation cannot forget the live entry.
        dispatched.forget("a", first);
        assert!(dispatched.insert("a").is_none());
    }

    #[tokio::test]
    async fn test_memory_stays_bounded_across_polls() {
        let h = harness(config());
        for ep in 0..(REMEMBERED_PER_FEED + 10) {
            h.feed
                .set_entries(
                    FEED,
                    vec![FeedEntry::new(
                        format!("[Sub] Show - {} [1080p]", ep),
                        format!("magnet:?xt=urn:btih:{}", ep),
                    )],
                )
                .await;
            join(h.poller.poll_once().await).await;
        }

        assert_eq!(h.poller.remembered(), REMEMBERED_PER_FEED);
    }

    #[tokio::test]
    async fn test_toggle() {
        let h = harness(config());
        assert!(h.poller.is_enabled());
        h.poller.set_enabled(false);
        assert!(!h.poller.is_enabled());
    }
}
